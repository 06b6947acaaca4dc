//! Debug Adapter Protocol front-end over `Content-Length` framed JSON.

mod protocol;
mod server;

pub use protocol::{read_message, write_message, DapMessage, DapMessageContent};
pub use server::DapUi;
