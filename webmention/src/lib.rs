pub mod handlers;
pub mod server;

pub use handlers::{database_path_for, load_urls_from_file, load_urls_from_source, parse_url_line};
pub use server::{AppState, build_router, serve};
