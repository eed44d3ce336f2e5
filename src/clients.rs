pub mod content;

pub use content::{
    ContentFetcher, FetchError, FetchTarget, FetchedContent, HttpContentFetcher,
    HttpFetcherConfig,
};
