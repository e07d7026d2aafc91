pub mod human_format;
pub mod time;
pub mod url;

pub use human_format::{format_bytes, format_duration};
pub use time::parse_xmltv_datetime;
pub use url::UrlUtils;
