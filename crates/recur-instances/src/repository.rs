use std::collections::HashMap;
use std::sync::RwLock;

use chrono::NaiveDate;

use crate::error::{InstanceError, Result};
use crate::types::{Occurrence, TaskTemplate};

pub trait TemplateRepository: Send + Sync {
    /// Insert or replace a template.
    fn save_template(&self, template: &TaskTemplate) -> Result<()>;

    fn get_template(&self, id: &str) -> Result<Option<TaskTemplate>>;

    fn find_active_templates(&self) -> Result<Vec<TaskTemplate>>;

    /// Move a template's generation horizon. Unknown ids are `NotFound`.
    fn update_last_generated_date(&self, id: &str, date: NaiveDate) -> Result<()>;
}

pub trait OccurrenceRepository: Send + Sync {
    /// Store new occurrences, skipping any `(template_id, instance_date)`
    /// that already exists. Returns how many were inserted.
    fn insert_occurrences(&self, occurrences: &[Occurrence]) -> Result<usize>;

    fn find_occurrence(&self, template_id: &str, date: NaiveDate) -> Result<Option<Occurrence>>;

    /// Occurrences of one template, by date.
    fn find_by_template(&self, template_id: &str) -> Result<Vec<Occurrence>>;

    /// Persist a lifecycle change of an existing occurrence.
    fn update_occurrence(&self, occurrence: &Occurrence) -> Result<()>;
}

/// Process-local store for tests and embedders without a database.
#[derive(Default)]
pub struct InMemoryTemplateStore {
    templates: RwLock<HashMap<String, TaskTemplate>>,
    occurrences: RwLock<HashMap<(String, NaiveDate), Occurrence>>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TemplateRepository for InMemoryTemplateStore {
    fn save_template(&self, template: &TaskTemplate) -> Result<()> {
        template.validate()?;
        self.templates
            .write()
            .expect("template store poisoned")
            .insert(template.id.clone(), template.clone());
        Ok(())
    }

    fn get_template(&self, id: &str) -> Result<Option<TaskTemplate>> {
        Ok(self.templates.read().expect("template store poisoned").get(id).cloned())
    }

    fn find_active_templates(&self) -> Result<Vec<TaskTemplate>> {
        let templates = self.templates.read().expect("template store poisoned");
        let mut active: Vec<_> = templates.values().filter(|t| t.active).cloned().collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(active)
    }

    fn update_last_generated_date(&self, id: &str, date: NaiveDate) -> Result<()> {
        let mut templates = self.templates.write().expect("template store poisoned");
        let template = templates
            .get_mut(id)
            .ok_or_else(|| InstanceError::NotFound { id: id.to_string() })?;
        template.last_generated_date = Some(date);
        Ok(())
    }
}

impl OccurrenceRepository for InMemoryTemplateStore {
    fn insert_occurrences(&self, occurrences: &[Occurrence]) -> Result<usize> {
        let mut stored = self.occurrences.write().expect("occurrence store poisoned");
        let mut inserted = 0;
        for occ in occurrences {
            let key = (occ.template_id.clone(), occ.instance_date);
            if !stored.contains_key(&key) {
                stored.insert(key, occ.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    fn find_occurrence(&self, template_id: &str, date: NaiveDate) -> Result<Option<Occurrence>> {
        let stored = self.occurrences.read().expect("occurrence store poisoned");
        Ok(stored.get(&(template_id.to_string(), date)).cloned())
    }

    fn find_by_template(&self, template_id: &str) -> Result<Vec<Occurrence>> {
        let stored = self.occurrences.read().expect("occurrence store poisoned");
        let mut found: Vec<_> = stored
            .values()
            .filter(|o| o.template_id == template_id)
            .cloned()
            .collect();
        found.sort_by_key(|o| o.instance_date);
        Ok(found)
    }

    fn update_occurrence(&self, occurrence: &Occurrence) -> Result<()> {
        let mut stored = self.occurrences.write().expect("occurrence store poisoned");
        let key = (occurrence.template_id.clone(), occurrence.instance_date);
        match stored.get_mut(&key) {
            Some(existing) => {
                *existing = occurrence.clone();
                Ok(())
            }
            None => Err(InstanceError::NotFound {
                id: occurrence.id.clone(),
            }),
        }
    }
}
