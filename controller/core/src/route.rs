use std::fmt;

/// The header used to select session traffic when a session does not declare
/// its own route.
pub const DEFAULT_ROUTE_HEADER: &str = "x-workspace-route";

/// The only route type the routing mutators know how to express.
pub const HEADER_ROUTE_TYPE: &str = "header";

/// Selects the slice of traffic that is redirected to a session's workloads.
///
/// Rendered and parsed as `type:name=value`, e.g. `header:x-user=alice`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Route {
    pub kind: String,
    pub name: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("route in wrong format. expected type:name=value")]
pub struct ParseRouteError(());

// === impl Route ===

impl Route {
    pub fn new(kind: impl ToString, name: impl ToString, value: impl ToString) -> Self {
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    /// Builds a header route matching `name: value`.
    pub fn header(name: impl ToString, value: impl ToString) -> Self {
        Self::new(HEADER_ROUTE_TYPE, name, value)
    }

    /// The route a session uses when none is declared: the default header
    /// carrying the session's name.
    pub fn session_default(session: &str) -> Self {
        Self::header(DEFAULT_ROUTE_HEADER, session)
    }

    /// Parses a `type:name=value` expression.
    ///
    /// An empty expression means "no route" rather than an error. Nothing is
    /// trimmed or unescaped, so a separator may not appear in any part.
    pub fn parse(expr: &str) -> Result<Option<Self>, ParseRouteError> {
        if expr.is_empty() {
            return Ok(None);
        }

        let (kind, rest) = split_pair(expr, ':').ok_or(ParseRouteError(()))?;
        let (name, value) = split_pair(rest, '=').ok_or(ParseRouteError(()))?;
        Ok(Some(Self::new(kind, name, value)))
    }

    pub fn is_header(&self) -> bool {
        self.kind == HEADER_ROUTE_TYPE
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}={}", self.kind, self.name, self.value)
    }
}

fn split_pair(s: &str, sep: char) -> Option<(&str, &str)> {
    let mut parts = s.split(sep);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(first), Some(second), None) => Some((first, second)),
        _ => None,
    }
}
