use crate::model::{FetchScope, Row, RowSet, ViewKind};
use crate::provider::DataProvider;
use anyhow::Result;
use futures::future::BoxFuture;
use std::fmt::{Display, Formatter};

pub type FetchFn =
    for<'a> fn(&'a dyn DataProvider, &'a FetchScope) -> BoxFuture<'a, Result<RowSet>>;

/// Static description of one logical view.
pub struct ViewDescriptor {
    pub kind: ViewKind,
    pub columns: &'static [&'static str],
    pub status_column: Option<usize>,
    pub identity_column: usize,
    pub requires_parent: bool,
    pub fetch: FetchFn,
}

impl ViewDescriptor {
    pub fn column_labels(&self) -> Vec<String> {
        self.columns.iter().map(|column| column.to_string()).collect()
    }
}

fn fetch_services<'a>(
    provider: &'a dyn DataProvider,
    scope: &'a FetchScope,
) -> BoxFuture<'a, Result<RowSet>> {
    provider.list_services(scope)
}

fn fetch_pools<'a>(
    provider: &'a dyn DataProvider,
    scope: &'a FetchScope,
) -> BoxFuture<'a, Result<RowSet>> {
    provider.list_compute_pools(scope)
}

fn fetch_repos<'a>(
    provider: &'a dyn DataProvider,
    scope: &'a FetchScope,
) -> BoxFuture<'a, Result<RowSet>> {
    provider.list_image_repositories(scope)
}

fn fetch_instances<'a>(
    provider: &'a dyn DataProvider,
    scope: &'a FetchScope,
) -> BoxFuture<'a, Result<RowSet>> {
    provider.list_service_instances(scope)
}

pub const SERVICE_COLUMNS: &[&str] = &["NAMESPACE", "NAME", "STATUS", "POOL", "AGE"];
pub const POOL_COLUMNS: &[&str] = &["NAME", "STATE", "MIN", "MAX", "FAMILY", "AGE"];
pub const REPO_COLUMNS: &[&str] = &["NAME", "REPO_URL", "OWNER", "AGE"];
pub const INSTANCE_COLUMNS: &[&str] = &["INSTANCE", "STATUS", "NODE", "AGE"];

static DESCRIPTORS: [ViewDescriptor; 4] = [
    ViewDescriptor {
        kind: ViewKind::Services,
        columns: SERVICE_COLUMNS,
        status_column: Some(2),
        identity_column: 1,
        requires_parent: false,
        fetch: fetch_services,
    },
    ViewDescriptor {
        kind: ViewKind::Pools,
        columns: POOL_COLUMNS,
        status_column: Some(1),
        identity_column: 0,
        requires_parent: false,
        fetch: fetch_pools,
    },
    ViewDescriptor {
        kind: ViewKind::Repos,
        columns: REPO_COLUMNS,
        status_column: None,
        identity_column: 0,
        requires_parent: false,
        fetch: fetch_repos,
    },
    ViewDescriptor {
        kind: ViewKind::Instances,
        columns: INSTANCE_COLUMNS,
        status_column: Some(1),
        identity_column: 0,
        requires_parent: true,
        fetch: fetch_instances,
    },
];

pub fn descriptor(kind: ViewKind) -> &'static ViewDescriptor {
    match kind {
        ViewKind::Services => &DESCRIPTORS[0],
        ViewKind::Pools => &DESCRIPTORS[1],
        ViewKind::Repos => &DESCRIPTORS[2],
        ViewKind::Instances => &DESCRIPTORS[3],
    }
}

/// Identity of the data a fetch was issued for. Completions for any other target are stale.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FetchTarget {
    pub view: ViewKind,
    pub namespace: String,
    pub parent: Option<String>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum NavigationError {
    MissingParent,
    NotFromServices,
}

impl Display for NavigationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingParent => write!(f, "Select a service first to view instances"),
            Self::NotFromServices => write!(f, "Instances view requires Services selection"),
        }
    }
}

#[derive(Debug, Clone)]
struct NavigationContext {
    view: ViewKind,
    parent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ViewRouter {
    database: String,
    namespace: String,
    context: NavigationContext,
}

impl ViewRouter {
    pub fn new(database: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            namespace: namespace.into(),
            context: NavigationContext {
                view: ViewKind::Services,
                parent: None,
            },
        }
    }

    pub fn current(&self) -> ViewKind {
        self.context.view
    }

    pub fn descriptor(&self) -> &'static ViewDescriptor {
        descriptor(self.context.view)
    }

    pub fn parent(&self) -> Option<&str> {
        self.context.parent.as_deref()
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// "Services", or "Instances (web)" while drilled into a parent.
    pub fn title(&self) -> String {
        match (&self.context.view, &self.context.parent) {
            (ViewKind::Instances, Some(parent)) => format!("Instances ({parent})"),
            (view, _) => view.title().to_string(),
        }
    }

    pub fn switch_view(&mut self, kind: ViewKind) -> Result<(), NavigationError> {
        if descriptor(kind).requires_parent {
            if self.context.parent.is_none() {
                return Err(NavigationError::MissingParent);
            }
        } else {
            self.context.parent = None;
        }
        self.context.view = kind;
        Ok(())
    }

    /// Enters the instances view for the service on `row`. Only valid from the services view.
    pub fn drill_into(&mut self, row: Option<&Row>) -> Result<(), NavigationError> {
        if self.context.view != ViewKind::Services {
            return Err(NavigationError::NotFromServices);
        }
        let identity = self.descriptor().identity_column;
        let parent = row
            .and_then(|row| row.cells.get(identity))
            .map(|cell| cell.trim())
            .filter(|cell| !cell.is_empty())
            .ok_or(NavigationError::MissingParent)?;

        self.context.parent = Some(parent.to_string());
        self.switch_view(ViewKind::Instances)
    }

    /// Leaves the drill-down. Returns false when there is nothing to go back from.
    pub fn back(&mut self) -> bool {
        if self.context.view != ViewKind::Instances {
            return false;
        }
        self.context.view = ViewKind::Services;
        self.context.parent = None;
        true
    }

    pub fn set_namespace(&mut self, namespace: &str) -> bool {
        let namespace = namespace.trim();
        if namespace.is_empty() {
            return false;
        }
        self.namespace = namespace.to_string();
        true
    }

    pub fn target(&self) -> FetchTarget {
        FetchTarget {
            view: self.context.view,
            namespace: self.namespace.clone(),
            parent: self.context.parent.clone(),
        }
    }

    pub fn scope_for(&self, target: &FetchTarget) -> FetchScope {
        FetchScope {
            database: self.database.clone(),
            namespace: target.namespace.clone(),
            parent: target.parent.clone(),
        }
    }

    pub fn empty_notice(&self, target: &FetchTarget) -> String {
        match target.view {
            ViewKind::Services => format!("No items found in {}", target.namespace),
            ViewKind::Pools => "No items found in compute pools".to_string(),
            ViewKind::Repos if self.database.is_empty() => {
                format!("No items found in {}", target.namespace)
            }
            ViewKind::Repos => format!("No items found in {}.{}", self.database, target.namespace),
            ViewKind::Instances => format!(
                "No instances found for {}",
                target.parent.as_deref().unwrap_or_default()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{NavigationError, ViewRouter, descriptor};
    use crate::model::{Row, ViewKind};

    fn service_row(name: &str) -> Row {
        Row::new(
            name,
            vec![
                "PUBLIC".to_string(),
                name.to_string(),
                "RUNNING".to_string(),
                "POOL_A".to_string(),
                "1h".to_string(),
            ],
        )
    }

    #[test]
    fn descriptors_match_their_views() {
        for view in ViewKind::ALL {
            let descriptor = descriptor(view);
            assert_eq!(descriptor.kind, view);
            if let Some(status) = descriptor.status_column {
                assert!(status < descriptor.columns.len());
            }
            assert!(descriptor.identity_column < descriptor.columns.len());
        }
        assert!(descriptor(ViewKind::Instances).requires_parent);
        assert_eq!(descriptor(ViewKind::Services).columns[1], "NAME");
    }

    #[test]
    fn instances_without_parent_are_rejected() {
        let mut router = ViewRouter::new("DB", "PUBLIC");
        assert_eq!(
            router.switch_view(ViewKind::Instances),
            Err(NavigationError::MissingParent)
        );
        assert_eq!(router.current(), ViewKind::Services);
    }

    #[test]
    fn drill_without_selection_stays_on_parent_view() {
        let mut router = ViewRouter::new("DB", "PUBLIC");
        assert_eq!(router.drill_into(None), Err(NavigationError::MissingParent));
        assert_eq!(router.current(), ViewKind::Services);
        assert_eq!(
            NavigationError::MissingParent.to_string(),
            "Select a service first to view instances"
        );
    }

    #[test]
    fn drill_uses_the_identity_column_and_back_clears_it() {
        let mut router = ViewRouter::new("DB", "PUBLIC");
        let row = service_row("web");
        router.drill_into(Some(&row)).expect("drill");
        assert_eq!(router.current(), ViewKind::Instances);
        assert_eq!(router.parent(), Some("web"));
        assert_eq!(router.title(), "Instances (web)");
        assert_eq!(router.target().parent.as_deref(), Some("web"));

        assert_eq!(
            router.drill_into(Some(&row)),
            Err(NavigationError::NotFromServices)
        );
        assert!(router.back());
        assert_eq!(router.current(), ViewKind::Services);
        assert_eq!(router.parent(), None);
        assert!(!router.back());
    }

    #[test]
    fn switching_to_a_top_level_view_drops_the_parent() {
        let mut router = ViewRouter::new("DB", "PUBLIC");
        router.drill_into(Some(&service_row("web"))).expect("drill");
        router.switch_view(ViewKind::Instances).expect("same parent");
        assert_eq!(router.parent(), Some("web"));

        router.switch_view(ViewKind::Pools).expect("pools");
        assert_eq!(router.parent(), None);
        assert!(router.switch_view(ViewKind::Instances).is_err());
        assert_eq!(router.current(), ViewKind::Pools);
    }

    #[test]
    fn namespace_changes_flow_into_targets_and_notices() {
        let mut router = ViewRouter::new("DB", "PUBLIC");
        let before = router.target();
        assert_eq!(router.empty_notice(&before), "No items found in PUBLIC");

        assert!(!router.set_namespace("   "));
        assert!(router.set_namespace("STAGING"));
        let after = router.target();
        assert_ne!(before, after);
        assert_eq!(router.scope_for(&after).namespace, "STAGING");
        assert_eq!(router.scope_for(&after).database, "DB");

        router.switch_view(ViewKind::Repos).expect("repos");
        assert_eq!(
            router.empty_notice(&router.target()),
            "No items found in DB.STAGING"
        );
    }
}
