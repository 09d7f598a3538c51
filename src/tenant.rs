//! Tenant Plane (C1): namespaces all data by `scope = private(user) |
//! team(id)`, builds retrieval filters, and enforces write attribution.
//! The plane does not authenticate; it trusts the caller to present an
//! already-resolved tenant.

use crate::error::{EngineError, Result};
use crate::index::{Filter, FilterCond, RecordType};
use crate::types::{Gate, Sensitivity, Visibility};

/// `(user_id, team_id?)`, carried as the first argument of every engine
/// operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    pub user_id: String,
    pub team_id: Option<String>,
}

impl TenantContext {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            team_id: None,
        }
    }

    pub fn with_team(user_id: impl Into<String>, team_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            team_id: Some(team_id.into()),
        }
    }

    /// The `user_id` a write under `visibility` should be attributed to:
    /// the caller for private writes, the synthetic `team:<team_id>` key
    /// for team writes (mirroring the source's tenant-key convention).
    pub fn write_user_id(&self, visibility: Visibility) -> Result<String> {
        match visibility {
            Visibility::Private => Ok(self.user_id.clone()),
            Visibility::Team => match &self.team_id {
                Some(team_id) => Ok(format!("team:{team_id}")),
                None => Err(EngineError::Config(
                    "cannot write a team-visibility memory without a team_id".to_string(),
                )),
            },
        }
    }
}

/// Optional narrowing accepted by [`make_filter`], beyond the bare tenant
/// predicate.
#[derive(Debug, Clone, Default)]
pub struct FilterOptions {
    pub gate: Option<Gate>,
    pub person: Option<String>,
    pub project: Option<String>,
    pub visibility: Option<Visibility>,
    pub sensitivity: Option<Sensitivity>,
    pub date: Option<String>,
}

/// Compose the tenant predicate for `record_type`:
/// - always a `type` discriminator;
/// - when `team_id` is absent: `user_id == ctx.user_id`;
/// - when `team_id` is present and no explicit visibility is requested:
///   `(user_id == ctx.user_id ∧ visibility == private) ∨
///    (team_id == ctx.team_id ∧ visibility == team)`;
/// - optional narrowing by gate/person/project/visibility/sensitivity/date.
pub fn make_filter(ctx: &TenantContext, record_type: RecordType, opts: &FilterOptions) -> Filter {
    let mut filter = Filter::new(record_type);

    match (&ctx.team_id, &opts.visibility) {
        (Some(team_id), None) => {
            filter = filter.with_should(vec![
                FilterCond::Eq("user_id", ctx.user_id.clone()),
                FilterCond::Eq("visibility", Visibility::Private.as_str().to_string()),
            ]);
            filter.should.push(vec![
                FilterCond::Eq("team_id", team_id.clone()),
                FilterCond::Eq("visibility", Visibility::Team.as_str().to_string()),
            ]);
        }
        (Some(team_id), Some(vis)) if *vis == Visibility::Team => {
            filter = filter.with(FilterCond::Eq("team_id", team_id.clone()));
            filter = filter.with(FilterCond::Eq("visibility", vis.as_str().to_string()));
        }
        _ => {
            filter = filter.with(FilterCond::Eq("user_id", ctx.user_id.clone()));
            if let Some(vis) = &opts.visibility {
                filter = filter.with(FilterCond::Eq("visibility", vis.as_str().to_string()));
            }
        }
    }

    if let Some(gate) = opts.gate {
        filter = filter.with(FilterCond::Eq("gate", gate.as_str().to_string()));
    }
    if let Some(person) = &opts.person {
        filter = filter.with(FilterCond::Eq("person", person.clone()));
    }
    if let Some(project) = &opts.project {
        filter = filter.with(FilterCond::Eq("project", project.clone()));
    }
    if let Some(sensitivity) = opts.sensitivity {
        filter = filter.with(FilterCond::Eq("sensitivity", sensitivity.as_str().to_string()));
    }
    if let Some(date) = &opts.date {
        filter = filter.with(FilterCond::Eq("date", date.clone()));
    }

    filter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_write_uses_caller_id() {
        let ctx = TenantContext::user("u1");
        assert_eq!(ctx.write_user_id(Visibility::Private).unwrap(), "u1");
    }

    #[test]
    fn team_write_without_team_id_is_config_error() {
        let ctx = TenantContext::user("u1");
        assert!(matches!(
            ctx.write_user_id(Visibility::Team),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn team_write_uses_synthetic_team_key() {
        let ctx = TenantContext::with_team("u1", "t1");
        assert_eq!(ctx.write_user_id(Visibility::Team).unwrap(), "team:t1");
    }

    #[test]
    fn solo_tenant_filters_on_user_id_only() {
        let ctx = TenantContext::user("u1");
        let filter = make_filter(&ctx, RecordType::Memory, &FilterOptions::default());
        assert!(filter.should.is_empty());
        assert_eq!(filter.must.len(), 2); // type + user_id
    }

    #[test]
    fn team_tenant_without_explicit_visibility_ors_private_and_team() {
        let ctx = TenantContext::with_team("u1", "t1");
        let filter = make_filter(&ctx, RecordType::Memory, &FilterOptions::default());
        assert_eq!(filter.should.len(), 2);
    }
}
