//! FUSE filesystem over a backend with a block cache

mod flow_fs;
mod inode_table;
mod reader;

pub use flow_fs::{FlowFs, FsOptions};
pub use inode_table::InodeTable;
pub use reader::BlockReader;
