pub mod authentication;
pub mod redirect;
pub mod request_info;

pub use authentication::{
    bearer_token, AuthenticationLayer, AuthenticationService, TokenAuthenticator,
    TokenReviewAuthenticator,
};
pub use redirect::{RedirectFilter, RedirectLayer, RedirectService};
pub use request_info::{resolve, RequestInfoLayer, RequestInfoService};
