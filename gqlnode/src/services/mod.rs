//! Moving fetches between the runtime and the network.

mod driver;
mod transport;

pub use self::driver::Driver;
pub use self::transport::ResponseStream;
pub use self::transport::Transport;
