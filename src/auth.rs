use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// Shared-password auth source for the wire handshake. Identity and
/// credential management live in front of this engine; the user name on
/// the startup message carries the member identity and role.
#[derive(Debug)]
pub struct ShopAuthSource {
    password: String,
}

impl ShopAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for ShopAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

// ── Roles ────────────────────────────────────────────────────────

/// Ordered roles: each tier includes the previous one's permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    /// Books and manages their own time.
    Participant,
    /// Reviews bookings, manages resources and opening hours.
    Tender,
    /// Full control, including hard resource deletion.
    Steward,
}

impl Role {
    /// Map a login name's role part to a role. Legacy role names from
    /// the previous membership system stay valid as aliases; unknown
    /// names get the least privilege.
    pub fn from_login(user: &str) -> Role {
        match user.to_ascii_lowercase().as_str() {
            "steward" | "owner" | "superadmin" => Role::Steward,
            "tender" | "admin" | "staff" => Role::Tender,
            "participant" | "member" | "user" => Role::Participant,
            _ => Role::Participant,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Participant => "participant",
            Role::Tender => "tender",
            Role::Steward => "steward",
        }
    }
}

/// The authenticated identity a connection acts as. Login names take
/// the form `name` or `name:role` (e.g. `ada:admin`); a bare name is a
/// participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub name: String,
    pub role: Role,
}

impl Actor {
    pub fn from_login(login: &str) -> Actor {
        match login.split_once(':') {
            Some((name, role)) => Actor {
                name: name.to_string(),
                role: Role::from_login(role),
            },
            None => Actor {
                name: login.to_string(),
                role: Role::from_login(login),
            },
        }
    }

    pub fn can_manage_resources(&self) -> bool {
        self.role >= Role::Tender
    }

    pub fn can_review_bookings(&self) -> bool {
        self.role >= Role::Tender
    }

    pub fn can_view_audit(&self) -> bool {
        self.role >= Role::Tender
    }

    pub fn can_hard_delete(&self) -> bool {
        self.role >= Role::Steward
    }

    /// Owners act on their own records; tenders and up act on anyone's.
    pub fn can_act_on(&self, owner: &str) -> bool {
        self.name == owner || self.role >= Role::Tender
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_role_aliases_resolve() {
        assert_eq!(Role::from_login("member"), Role::Participant);
        assert_eq!(Role::from_login("user"), Role::Participant);
        assert_eq!(Role::from_login("participant"), Role::Participant);
        assert_eq!(Role::from_login("admin"), Role::Tender);
        assert_eq!(Role::from_login("staff"), Role::Tender);
        assert_eq!(Role::from_login("tender"), Role::Tender);
        assert_eq!(Role::from_login("owner"), Role::Steward);
        assert_eq!(Role::from_login("superadmin"), Role::Steward);
        assert_eq!(Role::from_login("ADMIN"), Role::Tender);
    }

    #[test]
    fn unknown_login_gets_least_privilege() {
        assert_eq!(Role::from_login("ada"), Role::Participant);
    }

    #[test]
    fn login_with_role_suffix() {
        let actor = Actor::from_login("ada:admin");
        assert_eq!(actor.name, "ada");
        assert_eq!(actor.role, Role::Tender);

        let actor = Actor::from_login("grace");
        assert_eq!(actor.name, "grace");
        assert_eq!(actor.role, Role::Participant);
    }

    #[test]
    fn role_ordering_implies_permissions() {
        let participant = Actor::from_login("ada");
        let tender = Actor::from_login("bob:tender");
        let steward = Actor::from_login("eve:steward");

        assert!(!participant.can_review_bookings());
        assert!(tender.can_review_bookings());
        assert!(!tender.can_hard_delete());
        assert!(steward.can_hard_delete());

        assert!(participant.can_act_on("ada"));
        assert!(!participant.can_act_on("bob"));
        assert!(tender.can_act_on("ada"));
    }
}
