//! Create path: a new bundle (leader plus siblings)

use tracing::info;
use tracker_common::tokens::new_bundle_id;

use super::{count_part, summarize, MutationOutcome, PromotedFiles, SourceSubmission, SourceWorkflow, Written};
use crate::db::{events, sources, temp_uploads};
use crate::db::sources::{Attachment, SourceFields};
use crate::error::{ApiError, ApiResult, FormErrors};
use crate::forms::{validate_extra_links, validate_source_fields};

pub(super) const SUMMARY_TAKEN: &str = "Summary must be different from existing ones for this event.";
const NOTHING_ATTACHED: &str = "Please add at least one link or file before saving.";

impl<'a> SourceWorkflow<'a> {
    /// Create a source bundle under `event_id`
    pub async fn create(&self, event_id: i64, sub: SourceSubmission, user_id: i64) -> ApiResult<MutationOutcome> {
        if events::get(self.db, event_id).await?.is_none() {
            return Err(ApiError::NotFound(format!("Event {} not found", event_id)));
        }

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
            && sources::summary_taken(self.db, event_id, &sub.form.summary, None).await?
        {
            errors.add("summary", SUMMARY_TAKEN);
        }

        let attachments = usize::from(!sub.form.link_or_file.trim().is_empty())
            + prepared.staged.count()
            + prepared.extra_links.len();
        if attachments == 0 {
            errors.add_form(NOTHING_ATTACHED);
        }

        let fields = match fields {
            Some(fields) if errors.is_empty() => fields,
            _ => return Err(self.reject(errors, &sub, &prepared)),
        };

        let promoted = self.promote(&prepared.staged).await?;
        let bundle_id = new_bundle_id();
        let written = self
            .write_new_bundle(event_id, &bundle_id, &fields, &sub, &prepared.extra_links, &promoted, user_id)
            .await;
        let (leader_id, created_ids) = match written {
            Ok(Written::Committed(ids)) => ids,
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
        if promoted.main.is_some() {
            parts.push("main file attached".to_string());
        }
        if !sub.form.link_or_file.trim().is_empty() {
            parts.push("main link added".to_string());
        }
        parts.extend(count_part(promoted.extras.len(), "additional file(s) added"));
        parts.extend(count_part(prepared.extra_links.len(), "additional link(s) added"));

        info!(
            event_id,
            leader_id,
            bundle_id = %bundle_id,
            siblings = created_ids.len(),
            "Source created"
        );

        Ok(MutationOutcome {
            leader_id,
            bundle_id,
            created_ids,
            archived_ids: Vec::new(),
            version_id: None,
            message: summarize("created", &parts),
            warnings: prepared.warnings,
        })
    }

    /// All rows of a new bundle in one transaction
    ///
    /// The leader insert comes first so the transaction holds the write
    /// lock before the summary is checked against other bundles.
    #[allow(clippy::too_many_arguments)]
    async fn write_new_bundle(
        &self,
        event_id: i64,
        bundle_id: &str,
        fields: &SourceFields,
        sub: &SourceSubmission,
        extra_links: &[String],
        promoted: &PromotedFiles,
        user_id: i64,
    ) -> ApiResult<Written<(i64, Vec<i64>)>> {
        let mut tx = self.db.begin().await?;

        // Leader: primary link and main file
        let leader = Attachment {
            link: sub.form.link_or_file.trim().to_string(),
            file: promoted.main.clone(),
        };
        let (leader_id, _) = sources::insert(&mut *tx, event_id, bundle_id, fields, &leader, Some(user_id)).await?;

        if sources::summary_taken(&mut *tx, event_id, &fields.summary, Some(bundle_id)).await? {
            tx.rollback().await?;
            let mut errors = FormErrors::new();
            errors.add("summary", SUMMARY_TAKEN);
            return Ok(Written::Rejected(errors));
        }

        let created_ids =
            insert_siblings(&mut *tx, event_id, bundle_id, fields, extra_links, promoted, user_id).await?;

        temp_uploads::delete_rows(&mut *tx, &sub.batch.to_string(), None).await?;
        tx.commit().await?;
        Ok(Written::Committed((leader_id, created_ids)))
    }
}

/// One row per extra link, then one per extra file
pub(super) async fn insert_siblings(
    conn: &mut sqlx::SqliteConnection,
    event_id: i64,
    bundle_id: &str,
    fields: &SourceFields,
    extra_links: &[String],
    promoted: &PromotedFiles,
    user_id: i64,
) -> ApiResult<Vec<i64>> {
    let mut created = Vec::with_capacity(extra_links.len() + promoted.extras.len());
    for link in extra_links {
        let (id, _) =
            sources::insert(&mut *conn, event_id, bundle_id, fields, &Attachment::link(link.as_str()), Some(user_id))
                .await?;
        created.push(id);
    }
    for file in &promoted.extras {
        let (id, _) =
            sources::insert(&mut *conn, event_id, bundle_id, fields, &Attachment::file(file.clone()), Some(user_id))
                .await?;
        created.push(id);
    }
    Ok(created)
}
