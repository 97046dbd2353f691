pub mod arxiv;
pub mod blogs;
pub mod dblp;
pub(crate) mod feed_util;
pub mod github;
pub mod huggingface;
pub mod kev;
pub mod nvd;
pub mod pwc;
pub mod rss;
pub mod web_blogs;

pub use arxiv::ArxivFetcher;
pub use blogs::BlogFetcher;
pub use dblp::DblpFetcher;
pub use github::GithubFetcher;
pub use huggingface::HuggingfaceFetcher;
pub use kev::KevFetcher;
pub use nvd::NvdFetcher;
pub use pwc::PwcFetcher;
pub use rss::RssFetcher;
pub use web_blogs::{AnthropicRedFetcher, AtumBlogFetcher, HunyuanFetcher};
