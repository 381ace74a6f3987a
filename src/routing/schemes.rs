//! Subdomain grammars.
//!
//! Three mutually exclusive grammars are recognised, each by its own parser:
//!
//! ```text
//! port-<port>-<morph_id>               → port-<port>-morphvm-<morph_id>.<provider>
//! cmux-<morph_id>[-<scope>]-<port>     → port-<router_port>-morphvm-<morph_id>.<provider>
//! <workspace...>-<port>-<vm_slug>      → <vm_slug>.<alt provider>
//! ```
//!
//! Every parsed scheme can be inverted with [`SubdomainScheme::public_host`]
//! to rebuild the public hostname for a different port in the same sandbox.

use thiserror::Error;

use crate::config::RouterConfig;

/// Why a subdomain that claims a grammar could not be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubdomainError {
    #[error("Invalid port subdomain")]
    PortShape,

    #[error("Invalid cmux proxy subdomain")]
    CmuxShape,

    #[error("Invalid port in cmux proxy subdomain")]
    CmuxPort,

    #[error("Invalid cmux subdomain")]
    WorkspaceShape,

    #[error("Invalid port in subdomain")]
    Port,
}

/// A parsed subdomain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubdomainScheme {
    /// `port-<port>-<morph_id>`
    Port { port: u16, morph_id: String },
    /// `cmux-<morph_id>[-<scope>]-<port>`; `scope` is `None` for the base scope.
    Cmux {
        morph_id: String,
        scope: Option<String>,
        port: u16,
    },
    /// `<workspace>-<port>-<vm_slug>`
    Workspace {
        workspace: String,
        port: u16,
        vm_slug: String,
    },
}

/// Result of a single grammar parser. `None` means the grammar does not apply.
pub type ParseOutcome = Option<Result<SubdomainScheme, SubdomainError>>;

/// Parsers in priority order. Prefix grammars come before the catch-all.
pub const SCHEME_PARSERS: [fn(&str) -> ParseOutcome; 3] =
    [parse_port_scheme, parse_cmux_scheme, parse_workspace_scheme];

/// Parse `sub` against every grammar, first match wins.
pub fn parse_subdomain(sub: &str) -> Result<SubdomainScheme, SubdomainError> {
    SCHEME_PARSERS
        .iter()
        .find_map(|parse| parse(sub))
        .unwrap_or(Err(SubdomainError::WorkspaceShape))
}

/// `port-<port>-<morph_id>`. The morph id may itself contain dashes.
pub fn parse_port_scheme(sub: &str) -> ParseOutcome {
    if !sub.starts_with("port-") {
        return None;
    }
    let parts: Vec<&str> = sub.split('-').collect();
    if parts.len() < 3 {
        return Some(Err(SubdomainError::PortShape));
    }
    let Some(port) = parse_port(parts[1]) else {
        return Some(Err(SubdomainError::Port));
    };
    let morph_id = parts[2..].join("-");
    if morph_id.is_empty() {
        return Some(Err(SubdomainError::PortShape));
    }
    Some(Ok(SubdomainScheme::Port { port, morph_id }))
}

/// `cmux-<morph_id>[-<scope>]-<port>`. Middle segments form the scope.
pub fn parse_cmux_scheme(sub: &str) -> ParseOutcome {
    let remainder = sub.strip_prefix("cmux-")?;
    let segments: Vec<&str> = remainder.split('-').collect();
    if segments.len() < 2 {
        return Some(Err(SubdomainError::CmuxShape));
    }
    let Some(port) = parse_port(segments[segments.len() - 1]) else {
        return Some(Err(SubdomainError::CmuxPort));
    };
    let morph_id = segments[0];
    if morph_id.is_empty() {
        return Some(Err(SubdomainError::CmuxShape));
    }
    let middle = &segments[1..segments.len() - 1];
    let scope = (!middle.is_empty()).then(|| middle.join("-"));
    Some(Ok(SubdomainScheme::Cmux {
        morph_id: morph_id.to_string(),
        scope,
        port,
    }))
}

/// `<workspace...>-<port>-<vm_slug>`. Accepts any subdomain.
pub fn parse_workspace_scheme(sub: &str) -> ParseOutcome {
    let parts: Vec<&str> = sub.split('-').filter(|p| !p.is_empty()).collect();
    if parts.len() < 3 {
        return Some(Err(SubdomainError::WorkspaceShape));
    }
    let last = parts.len() - 1;
    let vm_slug = parts[last];
    let Some(port) = parse_port(parts[last - 1]) else {
        return Some(Err(SubdomainError::Port));
    };
    let workspace = parts[..last - 1].join("-");
    if workspace.is_empty() {
        return Some(Err(SubdomainError::WorkspaceShape));
    }
    Some(Ok(SubdomainScheme::Workspace {
        workspace,
        port,
        vm_slug: vm_slug.to_string(),
    }))
}

/// Digits only, non-zero, fits in a port.
fn parse_port(segment: &str) -> Option<u16> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse::<u16>().ok().filter(|port| *port != 0)
}

impl SubdomainScheme {
    /// Port the client asked for.
    pub fn port(&self) -> u16 {
        match self {
            SubdomainScheme::Port { port, .. }
            | SubdomainScheme::Cmux { port, .. }
            | SubdomainScheme::Workspace { port, .. } => *port,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SubdomainScheme::Port { .. } => "port",
            SubdomainScheme::Cmux { .. } => "cmux",
            SubdomainScheme::Workspace { .. } => "workspace",
        }
    }

    /// Backend hostname rendered from the scheme's template.
    pub fn backend_host(&self, config: &RouterConfig) -> String {
        let router_port = config.router_port.to_string();
        let port = self.port().to_string();
        match self {
            SubdomainScheme::Port { morph_id, .. } => render(
                &config.port_template,
                &[("{port}", port.as_str()), ("{morph_id}", morph_id.as_str())],
            ),
            SubdomainScheme::Cmux { morph_id, .. } => render(
                &config.cmux_template,
                &[
                    ("{router_port}", router_port.as_str()),
                    ("{port}", port.as_str()),
                    ("{morph_id}", morph_id.as_str()),
                ],
            ),
            SubdomainScheme::Workspace {
                workspace, vm_slug, ..
            } => render(
                &config.workspace_template,
                &[
                    ("{vm_slug}", vm_slug.as_str()),
                    ("{port}", port.as_str()),
                    ("{workspace}", workspace.as_str()),
                ],
            ),
        }
    }

    /// Public hostname reaching `port` in the same sandbox, under `domain`.
    pub fn public_host(&self, port: u16, domain: &str) -> String {
        match self {
            SubdomainScheme::Port { morph_id, .. } => format!("port-{port}-{morph_id}.{domain}"),
            SubdomainScheme::Cmux {
                morph_id, scope, ..
            } => {
                let scope = scope.as_deref().unwrap_or("base");
                format!("cmux-{morph_id}-{scope}-{port}.{domain}")
            }
            SubdomainScheme::Workspace {
                workspace, vm_slug, ..
            } => format!("{workspace}-{port}-{vm_slug}.{domain}"),
        }
    }
}

fn render(template: &str, values: &[(&str, &str)]) -> String {
    values
        .iter()
        .fold(template.to_string(), |acc, (key, value)| acc.replace(key, value))
}
