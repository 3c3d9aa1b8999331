//! Reverse-proxy label compiler
//!
//! Turns a [`RouteDescriptor`] into the ordered `traefik.*` label list the
//! proxy's container provider reads. The order of emitted labels and of the
//! middleware chain is fixed: strip-prefix, basic-auth (static), basic-auth
//! (file), IP allow-list, rate limit, compression, request headers.

use crate::models::{
    non_empty, RouteDescriptor, DEFAULT_ENTRYPOINT, FALLBACK_CERT_RESOLVER,
    PRIMARY_ROUTE_PRIORITY,
};

/// Middleware kinds in chain order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Middleware {
    StripPrefix,
    BasicAuth,
    BasicAuthFile,
    IpAllowList,
    RateLimit,
    Compress,
    Headers,
}

impl Middleware {
    /// Suffix appended to the service name to form the middleware name
    pub fn suffix(&self) -> &'static str {
        match self {
            Middleware::StripPrefix => "strip",
            Middleware::BasicAuth => "auth",
            Middleware::BasicAuthFile => "authfile",
            Middleware::IpAllowList => "ip",
            Middleware::RateLimit => "rate",
            Middleware::Compress => "compress",
            Middleware::Headers => "headers",
        }
    }

    pub fn name_for(&self, service_name: &str) -> String {
        format!("{}-{}", service_name, self.suffix())
    }
}

/// Compile the label list for a service route.
///
/// Returns an empty list when the route has neither a rule nor a host, so an
/// unexposed service never gets a partial router.
pub fn compile_labels(
    service_name: &str,
    route: &RouteDescriptor,
    default_resolver: Option<&str>,
) -> Vec<String> {
    let Some(rule) = route.match_rule() else {
        return Vec::new();
    };

    let router = format!("traefik.http.routers.{}", service_name);
    let mut labels = vec![
        "traefik.enable=true".to_string(),
        format!("{}.priority={}", router, PRIMARY_ROUTE_PRIORITY),
        format!("{}.rule={}", router, rule),
    ];

    let entry_points = if route.entry_points.is_empty() {
        DEFAULT_ENTRYPOINT.to_string()
    } else {
        route.entry_points.join(",")
    };
    labels.push(format!("{}.entrypoints={}", router, entry_points));

    let resolver = non_empty(&route.cert_resolver)
        .or(default_resolver.map(str::trim).filter(|r| !r.is_empty()))
        .unwrap_or(FALLBACK_CERT_RESOLVER);
    labels.push(format!("{}.tls.certresolver={}", router, resolver));

    let chain = middleware_chain(route);
    for middleware in &chain {
        labels.extend(middleware_labels(service_name, *middleware, route));
    }
    if !chain.is_empty() {
        let names: Vec<String> = chain.iter().map(|m| m.name_for(service_name)).collect();
        labels.push(format!("{}.middlewares={}", router, names.join(",")));
    }

    labels.push(format!(
        "traefik.http.services.{}.loadbalancer.server.port={}",
        service_name,
        route.port()
    ));
    labels
}

/// Enabled middlewares, in chain order
pub fn middleware_chain(route: &RouteDescriptor) -> Vec<Middleware> {
    let mut chain = Vec::new();
    if route.strip_prefix && non_empty(&route.path_prefix).is_some() {
        chain.push(Middleware::StripPrefix);
    }
    if !route.basic_auth.is_empty() {
        chain.push(Middleware::BasicAuth);
    }
    if non_empty(&route.basic_auth_file).is_some() {
        chain.push(Middleware::BasicAuthFile);
    }
    if !route.ip_allow_list.is_empty() {
        chain.push(Middleware::IpAllowList);
    }
    if route.rate_limit.as_ref().is_some_and(|r| r.average > 0) {
        chain.push(Middleware::RateLimit);
    }
    if route.compress {
        chain.push(Middleware::Compress);
    }
    if !route.headers.is_empty() {
        chain.push(Middleware::Headers);
    }
    chain
}

fn middleware_labels(service_name: &str, middleware: Middleware, route: &RouteDescriptor) -> Vec<String> {
    let prefix = format!("traefik.http.middlewares.{}", middleware.name_for(service_name));
    match middleware {
        Middleware::StripPrefix => vec![format!(
            "{}.stripprefix.prefixes={}",
            prefix,
            non_empty(&route.path_prefix).unwrap_or_default()
        )],
        Middleware::BasicAuth => vec![format!(
            "{}.basicauth.users={}",
            prefix,
            route.basic_auth.join(",")
        )],
        Middleware::BasicAuthFile => vec![format!(
            "{}.basicauth.usersfile={}",
            prefix,
            non_empty(&route.basic_auth_file).unwrap_or_default()
        )],
        Middleware::IpAllowList => vec![format!(
            "{}.ipallowlist.sourcerange={}",
            prefix,
            route.ip_allow_list.join(",")
        )],
        Middleware::RateLimit => {
            let limit = route.rate_limit.clone().unwrap_or_default();
            vec![
                format!("{}.ratelimit.average={}", prefix, limit.average),
                format!("{}.ratelimit.burst={}", prefix, limit.burst),
            ]
        }
        Middleware::Compress => vec![format!("{}.compress=true", prefix)],
        Middleware::Headers => route
            .headers
            .iter()
            .map(|(key, value)| format!("{}.headers.customrequestheaders.{}={}", prefix, key, value))
            .collect(),
    }
}
