//! Wire format of the Yate external module protocol.
//!
//! The protocol is line based: UTF-8 lines terminated by `\n`, made of
//! fields joined by `:`. Each field is escaped independently.
//!
//! - `escape`: per-field escaping and `key=value` parameters.
//! - `lines`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based stream framing.
//! - `directive`: line keywords and request correlation keys.
//! - `message`: parsed line views, outbound line builders, and result types.

pub mod directive;
pub mod escape;
pub mod lines;
pub mod message;
