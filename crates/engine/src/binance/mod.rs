pub mod stream;

pub use stream::BinanceStream;
