//! 工作进程包传输：长度前缀分帧与本地套接字。

mod packet;
mod socket;

pub use packet::{
    read_packet, write_end_of_stream, write_packet, Packet, PacketEvent, PacketType,
    TransportError, MAX_PAYLOAD_LEN,
};
pub use socket::SocketServer;
