pub mod http;
pub mod multipart;
pub mod retries;
