mod merch_shop;
mod response;

pub mod prelude {
    pub use crate::merch_shop::MerchShopClientInstrumented as MerchShopClient;
    pub use crate::response::CompletedRequest;

    // Needed to check a response, re-exported so scenarios don't have to depend on the
    // instruments crate directly
    pub use shop_tunnel_instruments::{AsOperation, Checks};
}
