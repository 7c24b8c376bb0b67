use std::collections::BTreeMap;

use crate::config::Config;
use crate::models::{Deployment, BUILD_EXIT_CODE};
use crate::runtime::{
    ContainerSpec, LogConfig, BRANCH_LABEL, DEPLOYMENT_LABEL, ENVIRONMENT_LABEL, MANAGED_LABEL,
    PROJECT_LABEL,
};

const WORKING_DIR: &str = "/app";

/// Router and service name shared by container labels and routing files
pub fn deployment_router(deployment: &Deployment) -> String {
    format!("deployment-{}", deployment.id)
}

/// Per-deployment preview hostname label, e.g. `shop-id-3f2a9c1`
pub fn preview_label(project_slug: &str, deployment: &Deployment) -> String {
    let id = deployment.id.simple().to_string();
    format!("{}-id-{}", project_slug, &id[..7])
}

/// Build the container spec for a deployment from its frozen config
pub fn build_container_spec(
    config: &Config,
    project_slug: &str,
    deployment: &Deployment,
) -> ContainerSpec {
    let deploy_config = &deployment.config;

    let mut env = deployment.env_vars.clone();
    env.insert("PORT".to_string(), config.runner_port.to_string());

    let cpus = deploy_config
        .cpus
        .filter(|c| *c > 0.0)
        .unwrap_or(config.default_cpus);
    let memory_mb = deploy_config
        .memory_mb
        .filter(|m| *m > 0)
        .unwrap_or(config.default_memory_mb);

    let log = config.log_driver.as_ref().map(|driver| {
        let mut options = BTreeMap::new();
        if driver == "loki" {
            options.insert("loki-url".to_string(), config.loki_url.clone());
            options.insert("loki-batch-size".to_string(), "200".to_string());
            options.insert(
                "labels".to_string(),
                [DEPLOYMENT_LABEL, PROJECT_LABEL, ENVIRONMENT_LABEL, BRANCH_LABEL].join(","),
            );
        }
        LogConfig {
            driver: driver.clone(),
            options,
        }
    });

    ContainerSpec {
        name: deployment.container_name(),
        image: format!("{}{}", config.runner_image_prefix, deploy_config.image),
        command: vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            init_script(deployment),
        ],
        env,
        labels: container_labels(config, project_slug, deployment),
        network: config.runner_network.clone(),
        working_dir: WORKING_DIR.to_string(),
        cpus,
        memory_mb,
        log,
    }
}

fn container_labels(
    config: &Config,
    project_slug: &str,
    deployment: &Deployment,
) -> BTreeMap<String, String> {
    let router = deployment_router(deployment);
    let host = format!(
        "{}.{}",
        preview_label(project_slug, deployment),
        config.deploy_domain
    );

    let mut labels = BTreeMap::from([
        (MANAGED_LABEL.to_string(), "true".to_string()),
        (DEPLOYMENT_LABEL.to_string(), deployment.id.to_string()),
        (PROJECT_LABEL.to_string(), deployment.project_id.to_string()),
        (
            ENVIRONMENT_LABEL.to_string(),
            deployment.environment_id.clone(),
        ),
        (BRANCH_LABEL.to_string(), deployment.branch.clone()),
        ("traefik.enable".to_string(), "true".to_string()),
        (
            "traefik.docker.network".to_string(),
            config.runner_network.clone(),
        ),
        (
            format!("traefik.http.routers.{}.rule", router),
            format!("Host(`{}`)", host),
        ),
        (
            format!("traefik.http.routers.{}.service", router),
            format!("{}@docker", router),
        ),
        (
            format!("traefik.http.routers.{}.priority", router),
            "10".to_string(),
        ),
        (
            format!("traefik.http.services.{}.loadbalancer.server.port", router),
            config.runner_port.to_string(),
        ),
    ]);

    if config.is_https() {
        labels.insert(
            format!("traefik.http.routers.{}.entrypoints", router),
            "websecure".to_string(),
        );
        labels.insert(
            format!("traefik.http.routers.{}.tls", router),
            "true".to_string(),
        );
        labels.insert(
            format!("traefik.http.routers.{}.tls.certresolver", router),
            "le".to_string(),
        );
    } else {
        labels.insert(
            format!("traefik.http.routers.{}.entrypoints", router),
            "web".to_string(),
        );
    }

    labels
}

/// Shell script run by the runner: optional root directory, install and
/// build steps, then the start command. Anything failing before the start
/// step exits with the build exit code.
pub fn init_script(deployment: &Deployment) -> String {
    let config = &deployment.config;
    let mut setup = Vec::new();

    let root = config
        .root_directory
        .as_deref()
        .map(normalize_root_directory)
        .unwrap_or_default();
    if !root.is_empty() {
        let quoted = shell_quote(&root);
        setup.push(format!(
            "{{ test -d {} || {{ echo \"Error: root directory {} not found\" 1>&2; false; }}; }}",
            quoted, root
        ));
        setup.push(format!("cd {}", quoted));
    }

    for step in [&config.install_command, &config.build_command] {
        if let Some(step) = step.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            setup.push(step.to_string());
        }
    }

    let start = format!("exec {}", config.start_command.trim());
    if setup.is_empty() {
        start
    } else {
        format!(
            "{{ {}; }} || exit {}; {}",
            setup.join(" && "),
            BUILD_EXIT_CODE,
            start
        )
    }
}

fn normalize_root_directory(raw: &str) -> String {
    let trimmed = raw.trim().trim_start_matches("./").trim_matches('/');
    if trimmed == "." {
        String::new()
    } else {
        trimmed.to_string()
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}
