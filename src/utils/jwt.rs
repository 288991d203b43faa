use jwks_client_rs::{source::WebSource, JwksClient};

use reqwest::Url;
use serde::Deserialize;
use std::{future::Future, pin::Pin, time::Duration};
use tide::{Next, Request, Response};

use crate::shop::service::{Caller, Role};

/// Claims the storefront cares about; anything else in the token is ignored.
/// A token without a role claim is a plain customer.
#[derive(Deserialize, Debug)]
pub struct Claims {
    sub: String,
    #[serde(default)]
    role: Option<Role>,
}

pub fn get_jwks_client(jwks_host: &str) -> JwksClient<WebSource> {
    let url = Url::parse(jwks_host).unwrap();
    let timeout: Duration = Duration::new(1, 500);

    let source: WebSource = WebSource::builder().build(url).unwrap();

    JwksClient::builder().time_to_live(timeout).build(source)
}

pub fn unauthorized_error() -> Response {
    let mut res = Response::new(401);
    res.set_body("Unauthorized");

    res
}

/// Resolves `Authorization: Bearer <token>` into a [`Caller`] request
/// extension. Requests without the header pass through anonymously and the
/// protected handlers reject them; a header that fails verification is
/// rejected here with 401.
pub fn jwt_middleware<'a, State: Clone + Send + Sync + 'static>(
    mut request: Request<State>,
    next: Next<'a, State>,
) -> Pin<Box<dyn Future<Output = tide::Result> + Send + 'a>> {
    Box::pin(async {
        let authorization_header = match request.header("Authorization") {
            Some(header) => header,
            None => return Ok(next.run(request).await),
        };

        let token = authorization_header
            .get(0)
            .map(|value| value.to_string().replace("Bearer ", ""))
            .unwrap_or_default();

        let jwks_host: String = std::env::var("JWKS_HOST").unwrap_or_default();
        let jwks_client = get_jwks_client(&jwks_host);

        match jwks_client
            .decode::<Claims>(token.as_str(), &[] as &[String])
            .await
        {
            Ok(claims) => {
                request.set_ext(Caller {
                    account: claims.sub,
                    role: claims.role.unwrap_or(Role::Customer),
                });
                Ok(next.run(request).await)
            }
            Err(err) => {
                tide::log::warn!("rejected bearer token: {}", err);
                Ok(unauthorized_error())
            }
        }
    })
}
