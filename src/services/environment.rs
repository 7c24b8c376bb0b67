use crate::models::{AliasKind, AliasTarget, Deployment, Project, ProjectEnvironment};

/// Find the environment a branch deploys to.
///
/// Production (the first environment) wins on an exact match. The remaining
/// environments are tried in order, matching either exactly or through a
/// single `*` wildcard (`feature/*`, `*-hotfix`, `release-*-rc`).
pub fn environment_for_branch<'a>(
    project: &'a Project,
    branch: &str,
) -> Option<&'a ProjectEnvironment> {
    let (production, rest) = project.environments.split_first()?;
    if production.is_active() && production.branch == branch {
        return Some(production);
    }

    rest.iter()
        .filter(|env| env.is_active())
        .find(|env| branch_matches(&env.branch, branch))
}

fn branch_matches(pattern: &str, branch: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }
    if pattern == branch {
        return true;
    }

    match pattern.split_once('*') {
        Some((prefix, suffix)) => {
            branch.len() >= prefix.len() + suffix.len()
                && branch.starts_with(prefix)
                && branch.ends_with(suffix)
        }
        None => false,
    }
}

/// Lowercase the branch and replace anything outside `[a-z0-9-]` with `-`
pub fn sanitize_branch(branch: &str) -> String {
    branch
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

pub fn branch_alias_key(project_slug: &str, branch: &str) -> String {
    format!("{}-branch-{}", project_slug, sanitize_branch(branch))
}

/// Production owns the bare project slug
pub fn environment_alias_key(project_slug: &str, environment: &ProjectEnvironment) -> String {
    if environment.is_production() {
        project_slug.to_string()
    } else {
        format!("{}-env-{}", project_slug, environment.slug)
    }
}

pub fn environment_id_alias_key(project_slug: &str, environment_id: &str) -> String {
    format!("{}-env-id-{}", project_slug, environment_id)
}

/// Every alias a succeeded deployment should be reachable under
pub fn alias_targets(project: &Project, deployment: &Deployment) -> Vec<AliasTarget> {
    let mut targets = vec![AliasTarget {
        key: branch_alias_key(&project.slug, &deployment.branch),
        kind: AliasKind::Branch,
        value: deployment.branch.clone(),
    }];

    if let Some(environment) = project.environment_by_id(&deployment.environment_id) {
        targets.push(AliasTarget {
            key: environment_alias_key(&project.slug, environment),
            kind: AliasKind::Environment,
            value: deployment.environment_id.clone(),
        });
    }

    targets.push(AliasTarget {
        key: environment_id_alias_key(&project.slug, &deployment.environment_id),
        kind: AliasKind::EnvironmentId,
        value: deployment.environment_id.clone(),
    });

    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeploymentConfig, ProjectStatus};
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn env(id: &str, slug: &str, branch: &str) -> ProjectEnvironment {
        ProjectEnvironment {
            id: id.into(),
            name: slug.into(),
            slug: slug.into(),
            branch: branch.into(),
            status: "active".into(),
        }
    }

    fn project(environments: Vec<ProjectEnvironment>) -> Project {
        let now = OffsetDateTime::now_utc();
        Project {
            id: Uuid::new_v4(),
            name: "Shop".into(),
            slug: "shop".into(),
            status: ProjectStatus::Active,
            environments,
            config: DeploymentConfig {
                image: "python-3.12".into(),
                root_directory: None,
                install_command: None,
                build_command: None,
                start_command: "gunicorn app:app".into(),
                cpus: None,
                memory_mb: None,
            },
            env_vars: vec![],
            last_traffic_at: None,
            deactivated_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_production_exact_match_wins() {
        let project = project(vec![
            env("prod", "production", "main"),
            env("stg", "staging", "*"),
        ]);

        assert_eq!(environment_for_branch(&project, "main").unwrap().id, "prod");
        assert_eq!(
            environment_for_branch(&project, "feature/cart").unwrap().id,
            "stg"
        );
    }

    #[test]
    fn test_wildcard_patterns_in_priority_order() {
        let project = project(vec![
            env("prod", "production", "main"),
            env("rc", "release", "release-*-rc"),
            env("feat", "features", "feature/*"),
            env("fix", "hotfixes", "*-hotfix"),
        ]);

        assert_eq!(
            environment_for_branch(&project, "release-2-rc").unwrap().id,
            "rc"
        );
        assert_eq!(
            environment_for_branch(&project, "feature/login").unwrap().id,
            "feat"
        );
        assert_eq!(
            environment_for_branch(&project, "cart-hotfix").unwrap().id,
            "fix"
        );
        assert!(environment_for_branch(&project, "develop").is_none());
    }

    #[test]
    fn test_inactive_environment_skipped() {
        let mut staging = env("stg", "staging", "develop");
        staging.status = "inactive".into();
        let project = project(vec![env("prod", "production", "main"), staging]);

        assert!(environment_for_branch(&project, "develop").is_none());
    }

    #[test]
    fn test_alias_keys() {
        let production = env("prod", "production", "main");
        let staging = env("stg", "staging", "develop");

        assert_eq!(
            branch_alias_key("shop", "Feature/Cart_2"),
            "shop-branch-feature-cart-2"
        );
        assert_eq!(environment_alias_key("shop", &production), "shop");
        assert_eq!(environment_alias_key("shop", &staging), "shop-env-staging");
        assert_eq!(environment_id_alias_key("shop", "stg"), "shop-env-id-stg");
    }
}
