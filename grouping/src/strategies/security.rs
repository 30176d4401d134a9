//! Browser security reports: CSP violations and certificate policy failures.

use serde::Deserialize;
use url::Url;

use crate::component::GroupingComponent;
use crate::context::GroupingContext;
use crate::event::Event;
use crate::strategies::{ComponentsByVariant, DEFAULT_VARIANTS, Strategy, call_with_variants};

const LOCAL: &str = "'self'";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Csp {
    effective_directive: Option<String>,
    violated_directive: Option<String>,
    blocked_uri: Option<String>,
}

impl Csp {
    fn normalized_blocked_uri(&self) -> String {
        normalize_uri(self.blocked_uri.as_deref().unwrap_or_default())
    }

    /// `unsafe-inline` or `unsafe-eval` for violations of locally sourced scripts.
    fn local_script_violation_type(&self) -> Option<&'static str> {
        let violated = self.violated_directive.as_deref()?;
        if self.effective_directive.as_deref() != Some("script-src")
            || self.normalized_blocked_uri() != LOCAL
        {
            return None;
        }
        if violated.contains("'unsafe-inline'") {
            Some("unsafe-inline")
        } else if violated.contains("'unsafe-eval'") {
            Some("unsafe-eval")
        } else {
            None
        }
    }
}

/// Reduces a reported URI to its origin, the only part that is stable
/// across reports.
fn normalize_uri(value: &str) -> String {
    if matches!(value, "" | "self" | "'self'" | "inline" | "eval") {
        return LOCAL.to_owned();
    }
    let Ok(url) = Url::parse(value) else {
        return value.to_owned();
    };
    match url.host_str() {
        Some(host) => match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        },
        None => format!("{}:", url.scheme()),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HostnameReport {
    hostname: Option<String>,
}

pub struct CspStrategy;

impl Strategy for CspStrategy {
    fn id(&self) -> &'static str {
        "csp"
    }

    fn name(&self) -> &'static str {
        "csp"
    }

    fn evaluate(&self, event: &Event, context: &mut GroupingContext<'_>) -> ComponentsByVariant {
        let Some(csp) = event.interface::<Csp>("csp") else {
            return ComponentsByVariant::new();
        };
        call_with_variants(context, DEFAULT_VARIANTS, |_| {
            let salt = GroupingComponent::with_values(
                "salt",
                csp.effective_directive.as_deref().into_iter(),
            );
            let blocked_uri = csp.normalized_blocked_uri();

            let (violation, uri) = match csp.local_script_violation_type() {
                Some(violation_type) => {
                    let violation = GroupingComponent::with_values(
                        "violation",
                        [format!("'{violation_type}'")],
                    );
                    let mut uri = GroupingComponent::with_values("uri", [blocked_uri]);
                    uri.ignore("violation takes precedence");
                    (violation, uri)
                }
                None => {
                    let mut violation = GroupingComponent::new("violation");
                    violation.set_hint("not a local script violation");
                    (violation, GroupingComponent::with_values("uri", [blocked_uri]))
                }
            };
            Some(GroupingComponent::with_values("csp", [salt, violation, uri]))
        })
    }
}

/// Shared behavior of the reports that only carry the failing hostname.
fn hostname_report(
    event: &Event,
    context: &mut GroupingContext<'_>,
    interface: &str,
    id: &str,
) -> ComponentsByVariant {
    let Some(report) = event.interface::<HostnameReport>(interface) else {
        return ComponentsByVariant::new();
    };
    call_with_variants(context, DEFAULT_VARIANTS, |_| {
        let hostname = GroupingComponent::with_values("hostname", report.hostname.as_deref());
        let salt = GroupingComponent::with_values("salt", [id]);
        Some(GroupingComponent::with_values(id, [salt, hostname]))
    })
}

pub struct HpkpStrategy;

impl Strategy for HpkpStrategy {
    fn id(&self) -> &'static str {
        "hpkp"
    }

    fn name(&self) -> &'static str {
        "hpkp"
    }

    fn evaluate(&self, event: &Event, context: &mut GroupingContext<'_>) -> ComponentsByVariant {
        hostname_report(event, context, "hpkp", "hpkp")
    }
}

pub struct ExpectStapleStrategy;

impl Strategy for ExpectStapleStrategy {
    fn id(&self) -> &'static str {
        "expect-staple"
    }

    fn name(&self) -> &'static str {
        "expectstaple"
    }

    fn evaluate(&self, event: &Event, context: &mut GroupingContext<'_>) -> ComponentsByVariant {
        hostname_report(event, context, "expectstaple", "expect-staple")
    }
}

pub struct ExpectCtStrategy;

impl Strategy for ExpectCtStrategy {
    fn id(&self) -> &'static str {
        "expect-ct"
    }

    fn name(&self) -> &'static str {
        "expectct"
    }

    fn evaluate(&self, event: &Event, context: &mut GroupingContext<'_>) -> ComponentsByVariant {
        hostname_report(event, context, "expectct", "expect-ct")
    }
}
