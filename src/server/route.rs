//! Predicate-based dispatch from a request to a handler factory.

use regex::Regex;

use request::Request;
use super::stream::{RequestStream, StreamFactory};


#[derive(Debug)]
enum PathMatch {
    Exact(String),
    Prefix(String),
    Pattern(Regex),
}

#[derive(Debug)]
enum HostMatch {
    Exact(String),
    Suffix(String),
}

#[derive(Debug, Clone, Copy)]
enum ComponentsMatch {
    Minimal(usize),
    Exact(usize),
    Maximal(usize),
}

/// Conjunction of match options; a route fires only when every option
/// set on it holds for the request.
#[derive(Debug, Default)]
pub struct Match {
    methods: Option<Vec<String>>,
    path: Option<PathMatch>,
    headers: Vec<(String, String)>,
    queries: Vec<(String, Option<String>)>,
    host: Option<HostMatch>,
    components: Option<ComponentsMatch>,
}

impl Match {
    pub fn new() -> Match {
        Match::default()
    }

    /// Request path equals `path` exactly.
    ///
    /// # Panics
    ///
    /// Only one of the path options may be set per route.
    pub fn exact_path(mut self, path: &str) -> Match {
        self.set_path(PathMatch::Exact(path.to_string()));
        self
    }

    /// Request path starts with `prefix`.
    pub fn prefix_path(mut self, prefix: &str) -> Match {
        self.set_path(PathMatch::Prefix(prefix.to_string()));
        self
    }

    /// Request path matches the regular expression in full.
    ///
    /// # Panics
    ///
    /// On an invalid pattern, and when another path option is already set.
    pub fn regex_path(mut self, pattern: &str) -> Match {
        let anchored = format!("^(?:{})$", pattern);
        let regex = Regex::new(&anchored).expect("valid route regex");
        self.set_path(PathMatch::Pattern(regex));
        self
    }

    fn set_path(&mut self, path: PathMatch) {
        if self.path.is_some() {
            panic!("only one path match option is allowed per route");
        }
        self.path = Some(path);
    }

    /// Request method is one of `methods`.
    pub fn methods(mut self, methods: &[&str]) -> Match {
        self.methods = Some(
            methods.iter().map(|m| m.to_string()).collect());
        self
    }

    /// Request carries header `name` with exactly this value.
    pub fn header(mut self, name: &str, value: &str) -> Match {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Query has an item with this key (any value, or none).
    pub fn query(mut self, key: &str) -> Match {
        self.queries.push((key.to_string(), None));
        self
    }

    /// Query has an item with this key and exactly this value.
    pub fn query_value(mut self, key: &str, value: &str) -> Match {
        self.queries.push((key.to_string(), Some(value.to_string())));
        self
    }

    pub fn minimal_path_components(mut self, count: usize) -> Match {
        self.set_components(ComponentsMatch::Minimal(count));
        self
    }

    pub fn exact_path_components(mut self, count: usize) -> Match {
        self.set_components(ComponentsMatch::Exact(count));
        self
    }

    pub fn maximal_path_components(mut self, count: usize) -> Match {
        self.set_components(ComponentsMatch::Maximal(count));
        self
    }

    fn set_components(&mut self, components: ComponentsMatch) {
        if self.components.is_some() {
            panic!("only one path components option is allowed per route");
        }
        self.components = Some(components);
    }

    /// `Host` header (without the port) equals `host`.
    pub fn host_exact(mut self, host: &str) -> Match {
        self.set_host(HostMatch::Exact(host.to_string()));
        self
    }

    /// `Host` header (without the port) ends with `suffix`.
    pub fn host_suffix(mut self, suffix: &str) -> Match {
        self.set_host(HostMatch::Suffix(suffix.to_string()));
        self
    }

    fn set_host(&mut self, host: HostMatch) {
        if self.host.is_some() {
            panic!("only one host match option is allowed per route");
        }
        self.host = Some(host);
    }

    /// True if the request satisfies every option.
    pub fn check(&self, request: &Request) -> bool {
        if let Some(ref methods) = self.methods {
            if !methods.iter().any(|m| m == request.method()) {
                return false;
            }
        }

        if let Some(components) = self.components {
            let count = request.url().path_components().len();
            let ok = match components {
                ComponentsMatch::Minimal(n) => count >= n,
                ComponentsMatch::Exact(n) => count == n,
                ComponentsMatch::Maximal(n) => count <= n,
            };
            if !ok {
                return false;
            }
        }

        if let Some(ref path) = self.path {
            let request_path = request.url().path();
            let ok = match *path {
                PathMatch::Exact(ref p) => request_path == p,
                PathMatch::Prefix(ref p) => request_path.starts_with(&p[..]),
                PathMatch::Pattern(ref regex) => regex.is_match(request_path),
            };
            if !ok {
                return false;
            }
        }

        if let Some(ref host) = self.host {
            let value = match request.headers().get("Host") {
                Some(value) => value,
                None => return false,
            };
            // strip the port from 'Host: domain.com:8080'
            let bare = match value.find(':') {
                Some(colon) => &value[..colon],
                None => value,
            };
            let ok = match *host {
                HostMatch::Exact(ref h) => bare == h,
                HostMatch::Suffix(ref h) => bare.ends_with(&h[..]),
            };
            if !ok {
                return false;
            }
        }

        for &(ref key, ref expected) in &self.queries {
            if !request.url().has_query_item(key) {
                return false;
            }
            if let Some(ref expected) = *expected {
                if request.url().query_value(key) != Some(&expected[..]) {
                    return false;
                }
            }
        }

        for &(ref name, ref expected) in &self.headers {
            match request.headers().get(name) {
                Some(value) if value == expected => {}
                _ => return false,
            }
        }

        true
    }
}

/// A linear route table; the first matching entry wins.
///
/// Routes are registered during initialization only, so dispatch needs
/// no locking.
#[derive(Default)]
pub struct Router {
    routes: Vec<(Match, StreamFactory)>,
}

impl Router {
    pub fn new() -> Router {
        Router { routes: Vec::new() }
    }

    pub fn add<F>(&mut self, options: Match, factory: F)
        where F: Fn() -> Box<RequestStream> + Send + Sync + 'static
    {
        self.routes.push((options, Box::new(factory)));
    }

    pub fn find(&self, request: &Request) -> Option<&StreamFactory> {
        self.routes.iter()
            .find(|&&(ref options, _)| options.check(request))
            .map(|&(_, ref factory)| factory)
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
