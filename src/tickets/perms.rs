use super::TicketConfig;

/// Capability snapshot of the acting user, assembled by the caller from
/// whatever the platform handed it. Keeping this explicit decouples the
/// predicates from any SDK member object.
#[derive(Debug, Clone, Default)]
pub struct ActorContext {
    pub user_id: String,
    pub display_name: String,
    pub is_admin: bool,
    pub is_workspace_manager: bool,
    pub role_ids: Vec<String>,
}

impl ActorContext {
    pub fn has_role(&self, role_id: &str) -> bool {
        self.role_ids.iter().any(|r| r == role_id)
    }
}

/// Admins and workspace managers always count as support staff; everyone
/// else needs the configured staff role.
pub fn is_support_staff(actor: &ActorContext, cfg: &TicketConfig) -> bool {
    if actor.is_admin || actor.is_workspace_manager {
        return true;
    }
    cfg.staff_role_id
        .as_deref()
        .is_some_and(|role| actor.has_role(role))
}

pub fn is_escalation_manager(actor: &ActorContext, cfg: &TicketConfig) -> bool {
    if actor.is_admin || actor.is_workspace_manager {
        return true;
    }
    cfg.escalation
        .manager_role_id
        .as_deref()
        .is_some_and(|role| actor.has_role(role))
}

/// The elevated capability behind `forceclose`. Deliberately stricter
/// than `is_support_staff`: the staff role does not qualify.
pub fn is_ticket_admin(actor: &ActorContext) -> bool {
    actor.is_admin || actor.is_workspace_manager
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(roles: &[&str]) -> ActorContext {
        ActorContext {
            user_id: "u1".to_string(),
            display_name: "u1".to_string(),
            role_ids: roles.iter().map(|r| r.to_string()).collect(),
            ..ActorContext::default()
        }
    }

    fn cfg_with_roles(staff: Option<&str>, manager: Option<&str>) -> TicketConfig {
        let mut cfg = TicketConfig {
            staff_role_id: staff.map(String::from),
            ..TicketConfig::default()
        };
        cfg.escalation.manager_role_id = manager.map(String::from);
        cfg
    }

    #[test]
    fn staff_role_grants_support() {
        let cfg = cfg_with_roles(Some("staff"), None);
        assert!(is_support_staff(&actor(&["staff"]), &cfg));
        assert!(!is_support_staff(&actor(&["other"]), &cfg));
    }

    #[test]
    fn admin_short_circuits_everything() {
        let cfg = cfg_with_roles(Some("staff"), Some("mgr"));
        let admin = ActorContext {
            is_admin: true,
            ..actor(&[])
        };
        assert!(is_support_staff(&admin, &cfg));
        assert!(is_escalation_manager(&admin, &cfg));
        assert!(is_ticket_admin(&admin));
    }

    #[test]
    fn workspace_manager_counts_as_staff() {
        let cfg = cfg_with_roles(None, None);
        let manager = ActorContext {
            is_workspace_manager: true,
            ..actor(&[])
        };
        assert!(is_support_staff(&manager, &cfg));
    }

    #[test]
    fn unconfigured_roles_grant_nothing() {
        let cfg = cfg_with_roles(None, None);
        assert!(!is_support_staff(&actor(&["staff"]), &cfg));
        assert!(!is_escalation_manager(&actor(&["mgr"]), &cfg));
    }

    #[test]
    fn staff_role_is_not_ticket_admin() {
        assert!(!is_ticket_admin(&actor(&["staff"])));
    }

    #[test]
    fn manager_role_grants_escalation_only() {
        let cfg = cfg_with_roles(Some("staff"), Some("mgr"));
        let mgr = actor(&["mgr"]);
        assert!(is_escalation_manager(&mgr, &cfg));
        assert!(!is_support_staff(&mgr, &cfg));
    }
}
