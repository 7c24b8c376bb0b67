//! Traefik dynamic configuration for one project.
//!
//! The snapshot is a pure function of the project's status, its aliases,
//! its active domains and the deployments those aliases point at. All maps
//! are ordered so the same inputs always serialize to the same bytes.

pub mod writer;

pub use writer::RoutingWriter;

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::error::AppResult;
use crate::models::{
    container_name, Alias, AliasKind, Deployment, Domain, DomainKind, DomainStatus, Project,
};

const CERT_RESOLVER: &str = "le";
const NOOP_SERVICE: &str = "noop@internal";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingSnapshot {
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    pub routers: BTreeMap<String, RouterConfig>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub services: BTreeMap<String, ServiceConfig>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub middlewares: BTreeMap<String, MiddlewareConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    pub rule: String,
    pub service: String,
    #[serde(rename = "entryPoints")]
    pub entry_points: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub middlewares: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(rename = "certResolver")]
    pub cert_resolver: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(rename = "loadBalancer")]
    pub load_balancer: LoadBalancer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub servers: Vec<ServerUrl>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerUrl {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiddlewareConfig {
    #[serde(rename = "redirectRegex")]
    pub redirect_regex: RedirectRegex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedirectRegex {
    pub regex: String,
    pub replacement: String,
    pub permanent: bool,
}

impl RoutingSnapshot {
    /// Nothing routable: the file should not exist
    pub fn is_empty(&self) -> bool {
        self.http.routers.is_empty()
    }

    /// Pretty JSON, which Traefik's file provider also accepts as YAML
    pub fn render(&self) -> AppResult<String> {
        let mut out = serde_json::to_string_pretty(self)?;
        out.push('\n');
        Ok(out)
    }

    /// Deployment a hostname currently routes to, if any
    pub fn deployment_for_host(&self, host: &str) -> Option<Uuid> {
        let rule = host_rule(host);
        let router = self.http.routers.values().find(|r| r.rule == rule)?;
        router
            .service
            .strip_prefix("deployment-")
            .and_then(|id| Uuid::parse_str(id).ok())
    }
}

/// Everything the snapshot is computed from
pub struct RoutingInput<'a> {
    pub project: &'a Project,
    pub aliases: &'a [Alias],
    pub domains: &'a [Domain],
    /// Deployments referenced by the aliases, read fresh from the store
    pub deployments: &'a HashMap<Uuid, Deployment>,
}

pub fn service_name(deployment_id: Uuid) -> String {
    format!("deployment-{}", deployment_id)
}

fn host_rule(host: &str) -> String {
    format!("Host(`{}`)", host)
}

pub fn alias_host(config: &Config, alias_key: &str) -> String {
    format!("{}.{}", alias_key, config.deploy_domain)
}

/// Compute the routing snapshot for a project
pub fn build_snapshot(config: &Config, input: &RoutingInput<'_>) -> RoutingSnapshot {
    let mut snapshot = RoutingSnapshot::default();
    if !input.project.is_active() {
        return snapshot;
    }

    let https = config.is_https();
    let entry_points: Vec<String> = if https {
        vec!["web".to_string(), "websecure".to_string()]
    } else {
        vec!["web".to_string()]
    };
    let tls = https.then(|| TlsConfig {
        cert_resolver: CERT_RESOLVER.to_string(),
    });

    // Aliases resolve only to succeeded deployments
    let live: Vec<&Alias> = input
        .aliases
        .iter()
        .filter(|alias| {
            input
                .deployments
                .get(&alias.deployment_id)
                .is_some_and(|d| d.is_succeeded())
        })
        .collect();

    let http = &mut snapshot.http;
    let add_service = |services: &mut BTreeMap<String, ServiceConfig>, id: Uuid| {
        services
            .entry(service_name(id))
            .or_insert_with(|| ServiceConfig {
                load_balancer: LoadBalancer {
                    servers: vec![ServerUrl {
                        url: format!("http://{}:{}", container_name(id), config.runner_port),
                    }],
                },
            });
    };

    for alias in &live {
        http.routers.insert(
            format!("router-alias-{}", alias.key),
            RouterConfig {
                rule: host_rule(&alias_host(config, &alias.key)),
                service: service_name(alias.deployment_id),
                entry_points: entry_points.clone(),
                middlewares: Vec::new(),
                tls: tls.clone(),
            },
        );
        add_service(&mut http.services, alias.deployment_id);
    }

    for domain in input
        .domains
        .iter()
        .filter(|d| d.status == DomainStatus::Active)
    {
        let find = |kind: AliasKind| {
            live.iter()
                .find(|a| a.kind == kind && a.value == domain.environment_id)
        };

        match domain.kind {
            DomainKind::Route => {
                let Some(target) = find(AliasKind::EnvironmentId) else {
                    continue;
                };
                http.routers.insert(
                    format!("router-domain-{}", domain.id),
                    RouterConfig {
                        rule: host_rule(&domain.hostname),
                        service: service_name(target.deployment_id),
                        entry_points: entry_points.clone(),
                        middlewares: Vec::new(),
                        tls: tls.clone(),
                    },
                );
                add_service(&mut http.services, target.deployment_id);
            }
            DomainKind::Redirect(_) => {
                let Some(target) =
                    find(AliasKind::Environment).or_else(|| find(AliasKind::EnvironmentId))
                else {
                    continue;
                };
                let middleware = format!("redirect-{}", domain.id);
                http.routers.insert(
                    format!("router-redirect-{}", domain.id),
                    RouterConfig {
                        rule: host_rule(&domain.hostname),
                        service: NOOP_SERVICE.to_string(),
                        entry_points: entry_points.clone(),
                        middlewares: vec![middleware.clone()],
                        tls: tls.clone(),
                    },
                );
                http.middlewares.insert(
                    middleware,
                    MiddlewareConfig {
                        redirect_regex: RedirectRegex {
                            regex: format!("^https?://{}/(.*)", domain.hostname.replace('.', "\\.")),
                            replacement: format!(
                                "{}://{}/$1",
                                config.url_scheme,
                                alias_host(config, &target.key)
                            ),
                            permanent: domain.kind.is_permanent(),
                        },
                    },
                );
            }
        }
    }

    snapshot
}
