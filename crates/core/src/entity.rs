//! Shared record metadata and tenant scoping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::TenantId;

/// Identity, tenant and timestamps common to every stored entity.
///
/// Embedded by value in each entity rather than inherited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMeta<I> {
    pub id: I,
    pub tenant_id: TenantId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<I> RecordMeta<I> {
    pub fn new(id: I, tenant_id: TenantId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            tenant_id,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

/// Entities that belong to exactly one tenant.
pub trait TenantScoped {
    fn tenant_id(&self) -> TenantId;
}

impl<I> TenantScoped for RecordMeta<I> {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

/// Filter an iterator of tenant-scoped entities down to one tenant.
pub fn scoped_to<'a, T, It>(tenant_id: TenantId, items: It) -> impl Iterator<Item = &'a T>
where
    T: TenantScoped + 'a,
    It: IntoIterator<Item = &'a T>,
{
    items
        .into_iter()
        .filter(move |item| item.tenant_id() == tenant_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_to_drops_other_tenants() {
        let now = Utc::now();
        let a = TenantId::new();
        let b = TenantId::new();
        let records = vec![
            RecordMeta::new(1u32, a, now),
            RecordMeta::new(2u32, b, now),
            RecordMeta::new(3u32, a, now),
        ];

        let ids: Vec<u32> = scoped_to(a, &records).map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 3]);
    }
}
