pub mod controller;
pub mod observer;
pub mod registry;
pub mod sitemap;

pub use controller::CrawlController;
pub use observer::RegistryObserver;
pub use registry::CrawlRegistry;
pub use sitemap::FetcherHttpAdapter;
