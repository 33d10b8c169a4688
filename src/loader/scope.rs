//! Scoped schemas for ephemeral fixtures

use super::Loader;
use crate::Result;
use std::ops::{Deref, DerefMut};

/// Guard returned by [`Loader::scoped`].
///
/// Classes built while the guard is alive are torn down when it exits:
/// their tables are dropped in reverse registration order and they leave the
/// catalog. Dropping the guard without calling [`Scope::exit`] tears down
/// too, logging any failure.
pub struct Scope<'l, 's> {
    loader: &'l mut Loader<'s>,
    /// Classes recorded by an enclosing scope, restored on exit
    outer: Option<Vec<String>>,
    active: bool,
}

impl<'l, 's> Scope<'l, 's> {
    pub(super) fn enter(loader: &'l mut Loader<'s>) -> Self {
        let outer = loader.scoped.replace(Vec::new());
        tracing::debug!("Entered schema scope");
        Self {
            loader,
            outer,
            active: true,
        }
    }

    /// Classes built inside this scope so far
    pub fn scoped_classes(&self) -> &[String] {
        self.loader.scoped.as_deref().unwrap_or_default()
    }

    /// Tear down now and report which classes were dropped.
    pub fn exit(mut self) -> Result<Vec<String>> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<Vec<String>> {
        if !self.active {
            return Ok(Vec::new());
        }
        self.active = false;

        let classes = std::mem::replace(&mut self.loader.scoped, self.outer.take()).unwrap_or_default();
        self.loader.drop_models(&classes)?;
        tracing::debug!("Exited schema scope, dropped {} classes", classes.len());
        Ok(classes)
    }
}

impl<'s> Deref for Scope<'_, 's> {
    type Target = Loader<'s>;

    fn deref(&self) -> &Self::Target {
        &*self.loader
    }
}

impl DerefMut for Scope<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.loader
    }
}

impl Drop for Scope<'_, '_> {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            tracing::warn!("Failed to tear down scoped classes: {}", e);
        }
    }
}
