//! Signee registry
//!
//! Holds the roster of participants, the active signee and the role rules
//! that decide who may see the toolbar and edit which fields.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use shared_types::{FieldName, Placement, Role, Signee, SigneeColor, SigneeId};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::{debug, warn};

use crate::config::{Palette, RosterConfig};
use crate::error::{RosterError, StoreError};
use crate::storage::{SessionStorage, KEY_USERS};

/// Ids are drawn from this range
const ID_SPACE: std::ops::Range<u32> = 1..1_000_000;

/// Roster composition rules
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RosterPolicy {
    pub single_editor: bool,
}

/// What a signee sees and may do in the viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityRules {
    pub can_edit: bool,
    pub sees_toolbar: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldCapability {
    pub editable: bool,
}

impl FieldCapability {
    pub fn read_only(&self) -> bool {
        !self.editable
    }
}

/// Role-level rules for a signee
pub fn visibility_rules(signee: &Signee) -> VisibilityRules {
    match signee.role {
        Role::Editor => VisibilityRules {
            can_edit: true,
            sees_toolbar: true,
        },
        // Signers only touch their own fields; see `field_capabilities`
        Role::Signer => VisibilityRules {
            can_edit: false,
            sees_toolbar: false,
        },
    }
}

/// Per-field capabilities of `signee` over `placements`.
///
/// Editors may edit every unsigned placement, signers only their own.
/// Signed placements are read-only for everyone.
pub fn field_capabilities(
    signee: &Signee,
    placements: &[Placement],
) -> BTreeMap<FieldName, FieldCapability> {
    let rules = visibility_rules(signee);
    placements
        .iter()
        .map(|p| {
            let owns = p.signee_id == signee.id;
            let editable = !p.signed && (rules.can_edit || owns);
            (p.field_name.clone(), FieldCapability { editable })
        })
        .collect()
}

pub struct SigneeRegistry {
    storage: Rc<dyn SessionStorage>,
    signees: RefCell<Vec<Signee>>,
    active: Cell<Option<SigneeId>>,
    palette: Vec<SigneeColor>,
    policy: RosterPolicy,
    rng: RefCell<StdRng>,
}

impl SigneeRegistry {
    pub fn new(storage: Rc<dyn SessionStorage>, palette: &Palette, policy: RosterPolicy) -> Self {
        Self::with_rng(storage, palette, policy, StdRng::from_entropy())
    }

    /// Registry with a caller-supplied RNG, for reproducible ids and colors
    pub fn with_rng(
        storage: Rc<dyn SessionStorage>,
        palette: &Palette,
        policy: RosterPolicy,
        rng: StdRng,
    ) -> Self {
        Self {
            storage,
            signees: RefCell::new(Vec::new()),
            active: Cell::new(None),
            palette: palette.0.clone(),
            policy,
            rng: RefCell::new(rng),
        }
    }

    /// Reload the roster saved under `users`, then seed from config if empty.
    ///
    /// The first Editor (or the first signee) becomes active.
    pub fn restore(&self, seed: &RosterConfig) -> Result<(), RosterError> {
        let saved = match self.read_users() {
            Ok(users) => users.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "ignoring unreadable roster");
                Vec::new()
            }
        };
        if saved.is_empty() {
            for s in &seed.signees {
                self.add_with_role(&s.name, &s.email, s.role)?;
            }
        } else {
            debug!(count = saved.len(), "restored roster");
            *self.signees.borrow_mut() = saved;
        }
        let first = {
            let signees = self.signees.borrow();
            signees
                .iter()
                .find(|s| s.is_editor())
                .or_else(|| signees.first())
                .map(|s| s.id)
        };
        self.active.set(first);
        Ok(())
    }

    /// Add a Signer
    pub fn add(&self, name: &str, email: &str) -> Result<Signee, RosterError> {
        self.add_with_role(name, email, Role::Signer)
    }

    pub fn add_with_role(&self, name: &str, email: &str, role: Role) -> Result<Signee, RosterError> {
        if self.palette.is_empty() {
            return Err(RosterError::EmptyPalette);
        }
        if role == Role::Editor && self.policy.single_editor && self.has_editor() {
            return Err(RosterError::DuplicateRole(Role::Editor));
        }

        let signee = {
            let mut rng = self.rng.borrow_mut();
            let signees = self.signees.borrow();

            // Rejection sampling against ids already handed out
            let id = loop {
                let candidate = SigneeId(rng.gen_range(ID_SPACE));
                if !signees.iter().any(|s| s.id == candidate) {
                    break candidate;
                }
            };

            let unused: Vec<SigneeColor> = self
                .palette
                .iter()
                .copied()
                .filter(|c| !signees.iter().any(|s| s.color == *c))
                .collect();
            let pool = if unused.is_empty() {
                &self.palette
            } else {
                &unused
            };
            let color = *pool.choose(&mut *rng).ok_or(RosterError::EmptyPalette)?;

            Signee {
                id,
                name: name.to_string(),
                email: email.to_string(),
                color,
                role,
            }
        };

        debug!(id = %signee.id, role = ?signee.role, "added signee");
        self.signees.borrow_mut().push(signee.clone());
        if self.active.get().is_none() {
            self.active.set(Some(signee.id));
        }
        self.persist();
        Ok(signee)
    }

    pub fn set_active(&self, id: SigneeId) -> Result<(), RosterError> {
        if self.get(id).is_none() {
            return Err(RosterError::UnknownSignee(id));
        }
        self.active.set(Some(id));
        Ok(())
    }

    pub fn active_signee(&self) -> Option<Signee> {
        self.active.get().and_then(|id| self.get(id))
    }

    pub fn set_color(&self, id: SigneeId, color: SigneeColor) -> Result<(), RosterError> {
        {
            let mut signees = self.signees.borrow_mut();
            let signee = signees
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or(RosterError::UnknownSignee(id))?;
            signee.color = color;
        }
        self.persist();
        Ok(())
    }

    pub fn get(&self, id: SigneeId) -> Option<Signee> {
        self.signees.borrow().iter().find(|s| s.id == id).cloned()
    }

    pub fn signees(&self) -> Vec<Signee> {
        self.signees.borrow().clone()
    }

    /// Rules for the active signee; nobody active means nothing is editable
    pub fn active_rules(&self) -> VisibilityRules {
        self.active_signee()
            .map(|s| visibility_rules(&s))
            .unwrap_or(VisibilityRules {
                can_edit: false,
                sees_toolbar: false,
            })
    }

    /// Replace the roster wholesale, e.g. from an imported session
    pub fn replace_all(&self, signees: Vec<Signee>) -> Result<(), RosterError> {
        if self.policy.single_editor && signees.iter().filter(|s| s.is_editor()).count() > 1 {
            return Err(RosterError::DuplicateRole(Role::Editor));
        }
        let active = self.active.get().filter(|id| signees.iter().any(|s| s.id == *id));
        let active = active.or_else(|| signees.first().map(|s| s.id));
        *self.signees.borrow_mut() = signees;
        self.active.set(active);
        self.persist();
        Ok(())
    }

    /// Drop the whole roster, including its saved copy
    pub fn discard(&self) {
        self.signees.borrow_mut().clear();
        self.active.set(None);
        if let Err(e) = self.storage.remove_item(KEY_USERS) {
            warn!(error = %e, "failed to discard saved roster");
        }
    }

    fn has_editor(&self) -> bool {
        self.signees.borrow().iter().any(|s| s.is_editor())
    }

    fn read_users(&self) -> Result<Option<Vec<Signee>>, StoreError> {
        match self.storage.get_item(KEY_USERS)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn persist(&self) {
        let result = serde_json::to_string(&*self.signees.borrow())
            .map_err(StoreError::from)
            .and_then(|json| self.storage.set_item(KEY_USERS, &json));
        if let Err(e) = result {
            warn!(error = %e, "failed to persist roster");
        }
    }
}
