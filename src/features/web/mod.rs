pub mod handler;
pub mod templates;

pub use handler::create_web_router;
pub use templates::PageTemplates;
