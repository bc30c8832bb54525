//! Actor Identity and Ownership Matching
//!
//! The core never issues identities; it consumes a verified actor
//! (email, surname, role) derived from a bearer token by an external
//! collaborator behind the `TokenVerifier` trait.
//!
//! Ownership for task visibility and restore: exact author match on the
//! actor's email, or a case-insensitive, diacritic-insensitive substring
//! match of the actor's surname within the task's recorded owner field.
//! Admins bypass the check entirely.

use serde::{Deserialize, Serialize};

/// Role of a verified actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Sees and restores everything
    Admin,
    /// Scoped to own or owner-matched tasks
    Member,
}

/// A verified actor identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Verified email address
    pub email: String,
    /// Surname used for owner-field matching
    pub surname: String,
    /// Role for permission checks
    pub role: Role,
}

impl Actor {
    /// Whether this actor bypasses ownership checks
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Verifies a bearer token into an actor identity.
///
/// Identity issuance lives outside this crate; tests use a static table.
pub trait TokenVerifier: Send + Sync + 'static {
    /// Resolve a bearer token, `None` if missing/invalid
    fn verify(&self, token: &str) -> Option<Actor>;
}

/// Lowercase and strip diacritics so "Muñoz" matches "munoz".
///
/// Folds the Latin-1 Supplement and Latin Extended-A ranges, which cover
/// the names this dataset actually contains; anything else passes
/// through lowercased.
pub fn normalize(s: &str) -> String {
    s.chars()
        .flat_map(|c| c.to_lowercase())
        .map(fold_diacritic)
        .collect()
}

fn fold_diacritic(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => 'a',
        'ç' | 'ć' | 'ĉ' | 'ċ' | 'č' => 'c',
        'ď' | 'đ' => 'd',
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ĕ' | 'ė' | 'ę' | 'ě' => 'e',
        'ĝ' | 'ğ' | 'ġ' | 'ģ' => 'g',
        'ĥ' | 'ħ' => 'h',
        'ì' | 'í' | 'î' | 'ï' | 'ĩ' | 'ī' | 'ĭ' | 'į' | 'ı' => 'i',
        'ĵ' => 'j',
        'ķ' => 'k',
        'ĺ' | 'ļ' | 'ľ' | 'ŀ' | 'ł' => 'l',
        'ñ' | 'ń' | 'ņ' | 'ň' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ŏ' | 'ő' => 'o',
        'ŕ' | 'ŗ' | 'ř' => 'r',
        'ś' | 'ŝ' | 'ş' | 'š' => 's',
        'ţ' | 'ť' | 'ŧ' => 't',
        'ù' | 'ú' | 'û' | 'ü' | 'ũ' | 'ū' | 'ŭ' | 'ů' | 'ű' | 'ų' => 'u',
        'ŵ' => 'w',
        'ý' | 'ÿ' | 'ŷ' => 'y',
        'ź' | 'ż' | 'ž' => 'z',
        other => other,
    }
}

/// Ownership rule for a single task record
pub fn owns_task(actor: &Actor, record_user: &str, record_owner: &str) -> bool {
    if actor.is_admin() {
        return true;
    }
    if actor.email == record_user {
        return true;
    }
    let surname = normalize(&actor.surname);
    // Empty surname would substring-match everything
    !surname.is_empty() && normalize(record_owner).contains(&surname)
}
