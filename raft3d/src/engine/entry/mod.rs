pub mod filament;
pub mod print_job;
pub mod printer;

pub use filament::{Filament, FilamentType};
pub use print_job::{PrintJob, PrintJobStatus, PrintJobStatusChange};
pub use printer::Printer;
