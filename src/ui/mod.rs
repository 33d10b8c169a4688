pub mod icons;
pub mod output;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{
    class_built, error, header, info, muted, section, status, success, summary_row, timing,
    warn,
};
pub use table::{class_table, stats_table, ClassRow, TableBuilder};
pub use theme::{theme, Theme};
