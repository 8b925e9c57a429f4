pub mod init_config;
pub mod mount;

pub use init_config::InitConfig;
pub use mount::Mount;
