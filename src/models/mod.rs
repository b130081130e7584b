pub mod department;
pub mod host;
pub mod hyperlink;
pub mod server;
pub mod server_update;
pub mod service;
pub mod ssl_certificate;
pub mod user;
pub mod vm;
