// Source adapters: concrete job sources plus the helpers they share.

pub mod feed;
pub mod time;

pub use feed::FeedAdapter;
