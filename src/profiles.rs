use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use ulid::Ulid;

use crate::engine::StoreError;
use crate::model::{AthleteInfo, ParentContact};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentProfile {
    pub id: Ulid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AthleteProfile {
    pub id: Ulid,
    pub parent_id: Ulid,
    pub name: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    Created,
    Existing,
}

/// Parent and athlete records provisioned after payment.
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    /// Match on email (case-insensitive) and phone, else create.
    async fn upsert_parent(
        &self,
        contact: &ParentContact,
    ) -> Result<(ParentProfile, Upserted), StoreError>;

    /// Match on name, date of birth and parent, else create.
    async fn upsert_athlete(
        &self,
        parent_id: Ulid,
        athlete: &AthleteInfo,
    ) -> Result<(AthleteProfile, Upserted), StoreError>;
}

#[derive(Default)]
pub struct InMemoryProfiles {
    parents: DashMap<Ulid, ParentProfile>,
    athletes: DashMap<Ulid, AthleteProfile>,
    /// Makes find-then-create atomic.
    write: Mutex<()>,
}

impl InMemoryProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parent_count(&self) -> usize {
        self.parents.len()
    }

    pub fn athlete_count(&self) -> usize {
        self.athletes.len()
    }
}

fn or_default(value: &str, default: &str) -> String {
    let v = value.trim();
    let chosen = if v.is_empty() { default } else { v };
    chosen.to_string()
}

#[async_trait]
impl ProfileDirectory for InMemoryProfiles {
    async fn upsert_parent(
        &self,
        contact: &ParentContact,
    ) -> Result<(ParentProfile, Upserted), StoreError> {
        let _write = self.write.lock().await;
        let email = contact.email.trim();
        let phone = contact.phone.trim();
        let existing = self
            .parents
            .iter()
            .find(|p| p.email.eq_ignore_ascii_case(email) && p.phone == phone)
            .map(|p| p.value().clone());
        if let Some(parent) = existing {
            return Ok((parent, Upserted::Existing));
        }

        let parent = ParentProfile {
            id: Ulid::new(),
            first_name: or_default(&contact.first_name, "Unknown"),
            last_name: or_default(&contact.last_name, "Parent"),
            email: email.to_string(),
            phone: phone.to_string(),
        };
        self.parents.insert(parent.id, parent.clone());
        Ok((parent, Upserted::Created))
    }

    async fn upsert_athlete(
        &self,
        parent_id: Ulid,
        athlete: &AthleteInfo,
    ) -> Result<(AthleteProfile, Upserted), StoreError> {
        let _write = self.write.lock().await;
        let name = athlete.name.trim();
        let existing = self
            .athletes
            .iter()
            .find(|a| {
                a.parent_id == parent_id && a.name == name && a.date_of_birth == athlete.date_of_birth
            })
            .map(|a| a.value().clone());
        if let Some(found) = existing {
            return Ok((found, Upserted::Existing));
        }

        let (first_name, last_name) = name.split_once(' ').unwrap_or((name, ""));
        let profile = AthleteProfile {
            id: Ulid::new(),
            parent_id,
            name: name.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.trim().to_string(),
            date_of_birth: athlete.date_of_birth,
        };
        self.athletes.insert(profile.id, profile.clone());
        Ok((profile, Upserted::Created))
    }
}
