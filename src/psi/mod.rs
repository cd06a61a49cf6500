pub mod pat;
pub mod pmt;
pub mod section;

pub use pat::{PatSection, parse_pat};
pub use pmt::{PmtSection, parse_pmt};
pub use section::SectionFilter;
