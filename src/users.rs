//! The built-in user table and the permission predicate.
//!
//! Accounts are compiled in; the on-disk format stores only owner uids.

use crate::config::{
    PERM_OTHER_EXEC, PERM_OTHER_READ, PERM_OTHER_WRITE, PERM_USER_EXEC, PERM_USER_READ,
    PERM_USER_WRITE, ROOT_UID,
};
use crate::structs::Inode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
    Execute,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub uid: i16,
    pub name: String,
}

#[derive(Debug)]
pub struct UserTable {
    accounts: Vec<(User, String)>,
}

impl Default for UserTable {
    fn default() -> Self {
        let accounts = [("root", ROOT_UID, "root"), ("user", 1, "user")]
            .into_iter()
            .map(|(name, uid, password)| {
                (
                    User {
                        uid,
                        name: name.to_owned(),
                    },
                    password.to_owned(),
                )
            })
            .collect();
        Self { accounts }
    }
}

impl UserTable {
    pub fn authenticate(&self, name: &str, password: &str) -> Option<User> {
        self.accounts
            .iter()
            .find(|(user, secret)| user.name == name && secret == password)
            .map(|(user, _)| user.clone())
    }
}

/// Pure predicate over the inode's 9-bit mode: root passes everything, the
/// owner is checked against the user class, anyone else against the other
/// class.
pub fn check_access(inode: &Inode, action: AccessKind, user: &User) -> bool {
    if user.uid == ROOT_UID {
        return true;
    }
    let (owner_bit, other_bit) = match action {
        AccessKind::Read => (PERM_USER_READ, PERM_OTHER_READ),
        AccessKind::Write => (PERM_USER_WRITE, PERM_OTHER_WRITE),
        AccessKind::Execute => (PERM_USER_EXEC, PERM_OTHER_EXEC),
    };
    let bit = if inode.owner == user.uid {
        owner_bit
    } else {
        other_bit
    };
    inode.permissions & bit != 0
}
