pub mod provider;

pub use provider::{
    paginate, NftItem, OpenSeaOptions, OpenSeaProvider, Page, PageLimits, Paginated,
    PaginationEnd, UpstreamResponse, DEFAULT_BASE_URL, DEFAULT_CHAIN,
};
