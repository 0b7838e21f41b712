//! Replace-all synchronization for exclusively owned children.
//!
//! Contacts and national certs are never shared, so every reconciliation deletes all of an
//! organisation's rows of one kind and inserts the desired ones. No audit entries are written.
use crate::engine::error::{CommitError, EngineResult};
use crate::model::{Contact, NationalCert};
use crate::store::{LeafKind, LeafRow, StoreResult, StoreTx, TableSet};

/// A leaf entity that maps onto the columns of one [`LeafKind`].
pub trait LeafRecord: Sized + Sync {
    const KIND: LeafKind;

    /// Value of a mandatory column; `None` when absent or null.
    fn field(&self, name: &str) -> Option<&str>;

    fn from_row(row: LeafRow) -> Self;
}

impl LeafRecord for Contact {
    const KIND: LeafKind = LeafKind::Contact;

    fn field(&self, name: &str) -> Option<&str> {
        match name {
            "firstname" => self.firstname.as_deref(),
            "lastname" => self.lastname.as_deref(),
            "tel" => self.tel.as_deref(),
            "openpgp_fpr" => self.openpgp_fpr.as_deref(),
            "email" => self.email.as_deref(),
            "comment" => self.comment.as_deref(),
            _ => None,
        }
    }

    fn from_row(row: LeafRow) -> Self {
        let mut values = row.values.into_iter().map(Some);
        Contact {
            contact_id: Some(row.id),
            firstname: values.next().flatten(),
            lastname: values.next().flatten(),
            tel: values.next().flatten(),
            openpgp_fpr: values.next().flatten(),
            email: values.next().flatten(),
            comment: values.next().flatten(),
        }
    }
}

impl LeafRecord for NationalCert {
    const KIND: LeafKind = LeafKind::NationalCert;

    fn field(&self, name: &str) -> Option<&str> {
        match name {
            "country_code" => self.country_code.as_deref(),
            "comment" => self.comment.as_deref(),
            _ => None,
        }
    }

    fn from_row(row: LeafRow) -> Self {
        let mut values = row.values.into_iter().map(Some);
        NationalCert {
            national_cert_id: Some(row.id),
            country_code: values.next().flatten(),
            comment: values.next().flatten(),
        }
    }
}

/// Column values of `leaf` in storage order, or the first missing mandatory field.
pub fn leaf_values<L: LeafRecord>(leaf: &L) -> Result<Vec<String>, CommitError> {
    L::KIND
        .fields()
        .iter()
        .map(|&field| {
            leaf.field(field)
                .map(str::to_owned)
                .ok_or(CommitError::FieldNotSet { field })
        })
        .collect()
}

/// Replaces every leaf of kind `L` owned by `org_id` with `desired`.
pub async fn sync_leaves<L: LeafRecord>(
    tx: &mut dyn StoreTx,
    org_id: i64,
    desired: &[L],
) -> EngineResult<()> {
    let removed = tx.delete_leaves(L::KIND, org_id).await?;
    for leaf in desired {
        let values = leaf_values(leaf)?;
        tx.insert_leaf(L::KIND, org_id, &values).await?;
    }
    tracing::debug!(
        table = L::KIND.table(),
        org_id,
        removed,
        inserted = desired.len(),
        "replaced leaves"
    );
    Ok(())
}

pub async fn load_leaves<L: LeafRecord>(
    tx: &mut dyn StoreTx,
    set: TableSet,
    org_id: i64,
) -> StoreResult<Vec<L>> {
    Ok(tx
        .leaves(set, L::KIND, org_id)
        .await?
        .into_iter()
        .map(L::from_row)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::error::EngineError;
    use crate::model::OrganisationRow;
    use crate::store::ContactStore;
    use crate::store::memory::InMemoryStore;

    fn contact(email: Option<&str>) -> Contact {
        Contact {
            contact_id: None,
            firstname: Some("Ada".to_string()),
            lastname: Some("".to_string()),
            tel: Some("+49 1".to_string()),
            openpgp_fpr: Some("".to_string()),
            email: email.map(str::to_string),
            comment: Some("".to_string()),
        }
    }

    #[test]
    fn empty_strings_are_accepted_but_missing_fields_are_not() {
        let values = leaf_values(&contact(Some(""))).expect("values");
        assert_eq!(values.len(), 6);
        assert_eq!(values[4], "");
        assert_eq!(
            leaf_values(&contact(None)),
            Err(CommitError::FieldNotSet { field: "email" })
        );
        let cert = NationalCert {
            national_cert_id: None,
            country_code: None,
            comment: Some(String::new()),
        };
        assert_eq!(
            leaf_values(&cert),
            Err(CommitError::FieldNotSet {
                field: "country_code"
            })
        );
    }

    #[tokio::test]
    async fn sync_replaces_all_rows() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.expect("begin");
        let org = tx
            .insert_organisation(&OrganisationRow {
                name: "org".to_string(),
                ..OrganisationRow::default()
            })
            .await
            .expect("org");

        sync_leaves(tx.as_mut(), org, &[contact(Some("a@example.org"))])
            .await
            .expect("first sync");
        sync_leaves(
            tx.as_mut(),
            org,
            &[contact(Some("b@example.org")), contact(Some("c@example.org"))],
        )
        .await
        .expect("second sync");

        let stored: Vec<Contact> = load_leaves(tx.as_mut(), TableSet::Manual, org).await.expect("load");
        let emails: Vec<_> = stored.iter().map(|c| c.email.as_deref()).collect();
        assert_eq!(emails, vec![Some("b@example.org"), Some("c@example.org")]);
        assert!(stored.iter().all(|c| c.contact_id.is_some()));

        let err = sync_leaves(tx.as_mut(), org, &[contact(None)])
            .await
            .expect_err("missing email");
        assert!(matches!(
            err,
            EngineError::Commit(CommitError::FieldNotSet { field: "email" })
        ));
    }
}
