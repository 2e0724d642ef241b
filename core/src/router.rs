use crate::{
    error::RegistrationError,
    middleware::PreMiddleware,
    pattern::{self, ParamTag, Segment},
    request::{PathParams, Request},
    response::Outcome,
};
use ahash::AHashMap as HashMap;
use anyhow::Result;
use http::Method;
use std::{fmt, sync::Arc};

/// A route handler. Receives the mutable request and returns a raw outcome
/// to be normalized.
pub type Handler = Arc<dyn Fn(&mut Request) -> Result<Outcome> + Send + Sync>;

/// The closed set of registrable methods.
const METHODS: [Method; 7] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::PATCH,
    Method::HEAD,
    Method::OPTIONS,
];

/// A registered route. Immutable once installed in the trie.
pub struct Route {
    method: Method,
    pattern: String,
    handler: Handler,
    middleware: Vec<PreMiddleware>,
}

/// The result of matching a method and path against the trie.
#[derive(Debug)]
pub enum RouteMatch<'r> {
    Match {
        route: &'r Route,
        params: PathParams,
    },
    /// The path terminates at a registered node, but not for this method.
    /// `allow` is sorted lexicographically.
    MethodNotAllowed {
        allow: Vec<Method>,
    },
    NotFound,
}

/// The path trie. Owns every [`Route`].
///
/// Lookup precedence at every node is literal > parameter > wildcard, with
/// parameter edges ordered most-restrictive tag first. This ordering is
/// fixed at registration and stable for the process lifetime.
#[derive(Default)]
pub struct Router {
    root: Node,
}

#[derive(Default)]
struct Node {
    literals: HashMap<String, Node>,
    params: Vec<ParamEdge>,
    wildcard: Option<Box<WildcardEdge>>,
    routes: HashMap<Method, Route>,
}

struct ParamEdge {
    name: String,
    tag: ParamTag,
    node: Node,
}

/// A wildcard edge is always terminal: it consumes the whole remainder.
struct WildcardEdge {
    name: String,
    routes: HashMap<Method, Route>,
}

// === impl Route ===

impl Route {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub(crate) fn handler(&self) -> &Handler {
        &self.handler
    }

    pub(crate) fn middleware(&self) -> &[PreMiddleware] {
        &self.middleware
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

// === impl Router ===

impl Router {
    /// Installs a route at the node addressed by `pattern`, keyed by
    /// `method`. Registration-time failures are startup-fatal; matching
    /// never fails.
    pub fn insert(
        &mut self,
        method: Method,
        pattern: &str,
        handler: Handler,
        middleware: Vec<PreMiddleware>,
        overwrite: bool,
    ) -> Result<(), RegistrationError> {
        if !METHODS.contains(&method) {
            return Err(RegistrationError::UnsupportedMethod(method));
        }
        let segments =
            pattern::parse(pattern).map_err(|source| RegistrationError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?;
        let route = Route {
            method,
            pattern: pattern.to_string(),
            handler,
            middleware,
        };

        let mut node = &mut self.root;
        for segment in &segments {
            match segment {
                Segment::Literal(literal) => {
                    node = node.literals.entry(literal.clone()).or_default();
                }
                Segment::Param { name, tag } => {
                    let found = node
                        .params
                        .iter()
                        .position(|edge| edge.name == *name && edge.tag == *tag);
                    let index = match found {
                        Some(index) => index,
                        None => {
                            node.params.push(ParamEdge {
                                name: name.clone(),
                                tag: *tag,
                                node: Node::default(),
                            });
                            // Most-restrictive tags first; the sort is
                            // stable, so equal tags keep registration order.
                            node.params.sort_by_key(|edge| edge.tag);
                            node.params
                                .iter()
                                .position(|edge| edge.name == *name && edge.tag == *tag)
                                .expect("edge was just inserted")
                        }
                    };
                    node = &mut node.params[index].node;
                }
                Segment::Wildcard { name } => {
                    // The parser guarantees this is the final segment.
                    let edge = node.wildcard.get_or_insert_with(|| {
                        Box::new(WildcardEdge {
                            name: name.clone(),
                            routes: HashMap::default(),
                        })
                    });
                    if edge.name != *name {
                        return Err(RegistrationError::ConflictingWildcard {
                            existing: edge.name.clone(),
                            new: name.clone(),
                        });
                    }
                    return Self::install(&mut edge.routes, route, overwrite);
                }
            }
        }
        Self::install(&mut node.routes, route, overwrite)
    }

    /// Matches a method and path. Returns one of three variants; never
    /// fails. The path's leading slash is discarded and a trailing slash is
    /// significant (it produces an empty final segment).
    pub fn at(&self, method: &Method, path: &str) -> RouteMatch<'_> {
        let rel = path.strip_prefix('/').unwrap_or(path);
        let segments: Vec<&str> = if rel.is_empty() {
            Vec::new()
        } else {
            rel.split('/').collect()
        };

        let mut bound = Vec::new();
        let mut allowed = None;
        match Self::walk(&self.root, &segments, method, &mut bound, &mut allowed) {
            Some(route) => RouteMatch::Match {
                route,
                params: PathParams::new(bound),
            },
            None => match allowed {
                Some(mut allow) => {
                    allow.sort_by(|a: &Method, b: &Method| a.as_str().cmp(b.as_str()));
                    RouteMatch::MethodNotAllowed { allow }
                }
                None => RouteMatch::NotFound,
            },
        }
    }

    /// All registered `(method, pattern)` pairs, sorted for stable output.
    pub fn routes(&self) -> Vec<(Method, String)> {
        let mut out = Vec::new();
        Self::collect(&self.root, &mut out);
        out.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.as_str().cmp(b.0.as_str())));
        out
    }

    /// Depth-first walk with backtracking. On success the bound parameters
    /// accumulated along the winning branch are left in `bound`; failed
    /// branches truncate their own bindings. The first terminal reached
    /// without the method records its allowed set and the search continues.
    fn walk<'r>(
        node: &'r Node,
        segments: &[&str],
        method: &Method,
        bound: &mut Vec<(String, String)>,
        allowed: &mut Option<Vec<Method>>,
    ) -> Option<&'r Route> {
        let Some((segment, rest)) = segments.split_first() else {
            return Self::terminal(&node.routes, method, allowed);
        };

        if let Some(child) = node.literals.get(*segment) {
            if let Some(route) = Self::walk(child, rest, method, bound, allowed) {
                return Some(route);
            }
        }

        for edge in &node.params {
            if edge.tag.accepts(segment) {
                bound.push((edge.name.clone(), (*segment).to_string()));
                if let Some(route) = Self::walk(&edge.node, rest, method, bound, allowed) {
                    return Some(route);
                }
                bound.pop();
            }
        }

        if let Some(edge) = &node.wildcard {
            bound.push((edge.name.clone(), segments.join("/")));
            if let Some(route) = Self::terminal(&edge.routes, method, allowed) {
                return Some(route);
            }
            bound.pop();
        }

        None
    }

    fn terminal<'r>(
        routes: &'r HashMap<Method, Route>,
        method: &Method,
        allowed: &mut Option<Vec<Method>>,
    ) -> Option<&'r Route> {
        if let Some(route) = routes.get(method) {
            return Some(route);
        }
        if !routes.is_empty() && allowed.is_none() {
            *allowed = Some(routes.keys().cloned().collect());
        }
        None
    }

    fn install(
        routes: &mut HashMap<Method, Route>,
        route: Route,
        overwrite: bool,
    ) -> Result<(), RegistrationError> {
        if routes.contains_key(&route.method) && !overwrite {
            return Err(RegistrationError::DuplicateRoute {
                method: route.method.clone(),
                pattern: route.pattern.clone(),
            });
        }
        routes.insert(route.method.clone(), route);
        Ok(())
    }

    fn collect(node: &Node, out: &mut Vec<(Method, String)>) {
        for route in node.routes.values() {
            out.push((route.method.clone(), route.pattern.clone()));
        }
        for child in node.literals.values() {
            Self::collect(child, out);
        }
        for edge in &node.params {
            Self::collect(&edge.node, out);
        }
        if let Some(edge) = &node.wildcard {
            for route in edge.routes.values() {
                out.push((route.method.clone(), route.pattern.clone()));
            }
        }
    }
}
