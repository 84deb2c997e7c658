use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{Error, http::header};
use futures_util::future::{LocalBoxFuture, ready, Ready};
use std::rc::Rc;

const API_CSP: &str = "default-src 'none'; frame-ancestors 'none'; base-uri 'none'; form-action 'self'";
const HSTS: &str = "max-age=63072000; includeSubDomains";

/// Adds hardening headers to every response that does not already set them.
/// Paths under `docs_prefix` keep their own CSP so Swagger UI can load.
#[derive(Clone)]
pub struct SecurityHeaders {
    pub enable_hsts: bool,
    pub docs_prefix: &'static str,
}

impl Default for SecurityHeaders {
    fn default() -> Self {
        Self { enable_hsts: false, docs_prefix: "/docs" }
    }
}

impl SecurityHeaders {
    pub fn from_env() -> Self {
        Self { enable_hsts: crate::config::flag("ENABLE_HSTS", false), ..Self::default() }
    }

    pub fn with_hsts(mut self, enable: bool) -> Self {
        self.enable_hsts = enable;
        self
    }

    fn static_headers(&self, is_docs: bool) -> Vec<(header::HeaderName, &'static str)> {
        let mut v = vec![
            (header::REFERRER_POLICY, "no-referrer"),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
            (header::X_FRAME_OPTIONS, "DENY"),
        ];
        if !is_docs {
            v.push((header::CONTENT_SECURITY_POLICY, API_CSP));
        }
        if self.enable_hsts {
            v.push((header::STRICT_TRANSPORT_SECURITY, HSTS));
        }
        v
    }
}

impl<S, B> Transform<S, ServiceRequest> for SecurityHeaders
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = SecurityHeadersMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(SecurityHeadersMiddleware { service: Rc::new(service), cfg: self.clone() }))
    }
}

pub struct SecurityHeadersMiddleware<S> {
    service: Rc<S>,
    cfg: SecurityHeaders,
}

impl<S, B> Service<ServiceRequest> for SecurityHeadersMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    actix_web::dev::forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let svc = self.service.clone();
        let extra = self.cfg.static_headers(req.path().starts_with(self.cfg.docs_prefix));
        Box::pin(async move {
            let mut res = svc.call(req).await?;
            let headers = res.response_mut().headers_mut();
            for (name, value) in extra {
                if !headers.contains_key(&name) {
                    headers.insert(name, header::HeaderValue::from_static(value));
                }
            }
            Ok(res)
        })
    }
}
