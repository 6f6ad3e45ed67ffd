//! Update path: edit a bundle through one of its rows
//!
//! The edited row is the leader for this run. Its descriptive fields are
//! copied to every member of the bundle; its attachment is replaced in
//! place, so its id and download token never change.

use tracing::info;
use tracker_common::db::Source;

use super::create::{insert_siblings, SUMMARY_TAKEN};
use super::{count_part, summarize, MutationOutcome, PromotedFiles, SourceSubmission, SourceWorkflow, Written};
use crate::db::sources::{Attachment, SourceFields, StoredFile};
use crate::db::{file_versions, sources, temp_uploads};
use crate::error::{ApiError, ApiResult, FormErrors};
use crate::forms::{validate_extra_links, validate_source_fields};

const BUNDLE_EMPTY: &str = "The bundle must keep at least one link or file.";

struct UpdateWrite {
    created_ids: Vec<i64>,
    archived_ids: Vec<i64>,
    version_id: Option<i64>,
}

impl<'a> SourceWorkflow<'a> {
    /// Update the bundle that row `source_id` belongs to
    pub async fn update(&self, source_id: i64, sub: SourceSubmission, user_id: i64) -> ApiResult<MutationOutcome> {
        let leader = sources::get(self.db, source_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Source {} not found", source_id)))?;

        let prepared = self.prepare(&sub, user_id).await?;

        let mut errors = FormErrors::new();
        let fields = match validate_source_fields(&sub.form) {
            Ok(fields) => Some(fields),
            Err(field_errors) => {
                errors.merge(field_errors);
                None
            }
        };
        validate_extra_links(&prepared.extra_links, &mut errors);

        if !sub.form.summary.trim().is_empty()
            && sources::summary_taken(self.db, leader.event_id, &sub.form.summary, Some(&leader.bundle_id)).await?
        {
            errors.add("summary", SUMMARY_TAKEN);
        }

        let members = sources::list_bundle(self.db, &leader.bundle_id).await?;
        for &id in &sub.remove_item_ids {
            if id == leader.id {
                errors.add("remove_item_ids", "The item being edited cannot be removed.");
            } else if !members.iter().any(|m| m.id == id) {
                errors.add("remove_item_ids", format!("Item {} does not belong to this source.", id));
            }
        }

        let fields = match fields {
            Some(fields) if errors.is_empty() => fields,
            _ => return Err(self.reject(errors, &sub, &prepared)),
        };

        let promoted = self.promote(&prepared.staged).await?;
        let written = match self.write_update(&leader, &fields, &sub, &prepared.extra_links, &promoted, user_id).await {
            Ok(Written::Committed(written)) => written,
            Ok(Written::Rejected(errors)) => {
                self.discard(&promoted.keys()).await;
                return Err(self.reject(errors, &sub, &prepared));
            }
            Err(e) => {
                self.discard(&promoted.keys()).await;
                return Err(e);
            }
        };

        self.staging().discard_blobs(&prepared.staged.all().cloned().collect::<Vec<_>>()).await;

        let mut parts = Vec::new();
        if fields_changed(&leader, &fields) {
            parts.push("details updated".to_string());
        }
        if promoted.main.is_some() {
            parts.push("main file updated".to_string());
        } else if sub.clear_main_file && leader.file_upload.is_some() {
            parts.push("main file removed".to_string());
        }
        if sub.form.link_or_file.trim() != leader.link_or_file.trim() {
            parts.push("main link updated".to_string());
        }
        parts.extend(count_part(promoted.extras.len(), "additional file(s) added"));
        parts.extend(count_part(prepared.extra_links.len(), "additional link(s) added"));
        parts.extend(count_part(written.archived_ids.len(), "item(s) archived"));

        info!(
            leader_id = leader.id,
            bundle_id = %leader.bundle_id,
            created = written.created_ids.len(),
            archived = written.archived_ids.len(),
            "Source updated"
        );

        Ok(MutationOutcome {
            leader_id: leader.id,
            bundle_id: leader.bundle_id,
            created_ids: written.created_ids,
            archived_ids: written.archived_ids,
            version_id: written.version_id,
            message: summarize("updated", &parts),
            warnings: prepared.warnings,
        })
    }

    /// All writes of an update in one transaction
    ///
    /// Rejected, with nothing committed, when another bundle took the
    /// summary first or the bundle would be left without any active link
    /// or file.
    async fn write_update(
        &self,
        leader: &Source,
        fields: &SourceFields,
        sub: &SourceSubmission,
        extra_links: &[String],
        promoted: &PromotedFiles,
        user_id: i64,
    ) -> ApiResult<Written<UpdateWrite>> {
        let mut tx = self.db.begin().await?;

        if !sources::lock_for_update(&mut *tx, leader.id).await? {
            return Err(ApiError::NotFound(format!("Source {} not found", leader.id)));
        }
        // Current attachment under the lock
        let current = sources::get(&mut *tx, leader.id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Source {} not found", leader.id)))?;

        if sources::summary_taken(&mut *tx, current.event_id, &fields.summary, Some(&current.bundle_id)).await? {
            tx.rollback().await?;
            let mut errors = FormErrors::new();
            errors.add("summary", SUMMARY_TAKEN);
            return Ok(Written::Rejected(errors));
        }

        let replacing = promoted.main.is_some() || sub.clear_main_file;
        let mut version_id = None;
        if replacing {
            if let (Some(old), Some(old_name)) = (&current.file_upload, current.attached_file_name()) {
                version_id = Some(file_versions::insert(&mut *tx, current.id, old, old_name, Some(user_id)).await?);
            }
        }
        let file = if replacing {
            promoted.main.clone()
        } else {
            current.file_upload.clone().map(|key| StoredFile {
                key,
                name: current.attached_file_name().unwrap_or_default().to_string(),
            })
        };
        let attachment = Attachment {
            link: sub.form.link_or_file.trim().to_string(),
            file,
        };
        sources::set_attachment(&mut *tx, current.id, &attachment).await?;

        sources::update_bundle_fields(&mut *tx, &current.bundle_id, fields).await?;
        let archived_ids =
            sources::archive_siblings(&mut *tx, &current.bundle_id, current.id, &sub.remove_item_ids).await?;
        let created_ids = insert_siblings(
            &mut *tx,
            current.event_id,
            &current.bundle_id,
            fields,
            extra_links,
            promoted,
            user_id,
        )
        .await?;

        if sources::count_active_attachments(&mut *tx, &current.bundle_id).await? == 0 {
            tx.rollback().await?;
            let mut errors = FormErrors::new();
            errors.add_form(BUNDLE_EMPTY);
            return Ok(Written::Rejected(errors));
        }

        temp_uploads::delete_rows(&mut *tx, &sub.batch.to_string(), None).await?;
        tx.commit().await?;

        Ok(Written::Committed(UpdateWrite {
            created_ids,
            archived_ids,
            version_id,
        }))
    }
}

fn fields_changed(leader: &Source, fields: &SourceFields) -> bool {
    leader.name != fields.name
        || leader.source_date != fields.source_date
        || leader.summary != fields.summary
        || leader.potential_impact != fields.potential_impact
        || leader.potential_impact_notes != fields.potential_impact_notes
}
