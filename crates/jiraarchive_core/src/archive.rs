use anyhow::{Context, Result, bail};

use crate::confluence::{Page, PageStore, PageSummary, PageUpdate};
use crate::jira::{Issue, IssueSearch};
use crate::render::{ReferenceTemplate, render_replacement};
use crate::widgets::{EntityDecoding, WidgetSpan, find_widgets_with, splice};

#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    pub decoding: EntityDecoding,
    pub version_message: String,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveOutcome {
    Archived,
    DryRun,
    NothingToArchive,
}

impl ArchiveOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Archived => "archived",
            Self::DryRun => "dry-run",
            Self::NothingToArchive => "nothing-to-archive",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedWidget {
    pub span: WidgetSpan,
    pub issues: Vec<Issue>,
    pub replacement: String,
}

#[derive(Debug, Clone)]
pub struct ArchiveReport {
    pub page_id: String,
    pub title: String,
    pub space_name: String,
    pub previous_version: u64,
    pub new_version: Option<u64>,
    pub outcome: ArchiveOutcome,
    pub widgets: Vec<ResolvedWidget>,
    pub new_body: Option<String>,
    pub request_count: usize,
}

impl ArchiveReport {
    pub fn issue_count(&self) -> usize {
        self.widgets.iter().map(|widget| widget.issues.len()).sum()
    }
}

/// Replace every Jira list widget on `page_id` with static references to the
/// issues its query currently matches, and upload the result as a new version.
pub fn archive_page_with_api<S, Q>(
    store: &mut S,
    search: &mut Q,
    template: &ReferenceTemplate,
    page_id: &str,
    options: &ArchiveOptions,
) -> Result<ArchiveReport>
where
    S: PageStore,
    Q: IssueSearch,
{
    let page = store.get_page(page_id)?;
    archive_loaded_page(store, search, template, &page, options)
}

/// Archive a page the caller already fetched, for example after showing it
/// to the user for confirmation. Only searches and the upload hit the network.
pub fn archive_loaded_page<S, Q>(
    store: &mut S,
    search: &mut Q,
    template: &ReferenceTemplate,
    page: &Page,
    options: &ArchiveOptions,
) -> Result<ArchiveReport>
where
    S: PageStore,
    Q: IssueSearch,
{
    let spans = find_widgets_with(&page.body, options.decoding)
        .with_context(|| format!("failed to scan page {} for Jira widgets", page.id))?;

    let mut report = ArchiveReport {
        page_id: page.id.clone(),
        title: page.title.clone(),
        space_name: page.space_name.clone(),
        previous_version: page.version,
        new_version: None,
        outcome: ArchiveOutcome::NothingToArchive,
        widgets: Vec::new(),
        new_body: None,
        request_count: 0,
    };

    if spans.is_empty() {
        log::info!("page {} has no Jira list widgets", page.id);
        report.request_count = store.request_count() + search.request_count();
        return Ok(report);
    }

    // Resolved in document order; each widget carries its own replacement.
    let mut resolved = Vec::with_capacity(spans.len());
    for span in spans {
        let issues = search
            .search(&span.query)
            .with_context(|| format!("failed to resolve widget at byte {}", span.start))?;
        let replacement = render_replacement(template, &issues);
        resolved.push(ResolvedWidget {
            span,
            issues,
            replacement,
        });
    }

    let edits = resolved
        .iter()
        .map(|widget| {
            (
                widget.span.start..widget.span.stop,
                widget.replacement.as_str(),
            )
        })
        .collect::<Vec<_>>();
    let new_body = splice(&page.body, &edits);
    report.widgets = resolved;

    if options.dry_run {
        report.outcome = ArchiveOutcome::DryRun;
    } else {
        let update = PageUpdate::next_version(page, new_body.clone(), &options.version_message);
        store
            .put_page(&update)
            .with_context(|| format!("failed to upload archived page {}", page.id))?;
        report.outcome = ArchiveOutcome::Archived;
        report.new_version = Some(update.version);
    }

    report.new_body = Some(new_body);
    report.request_count = store.request_count() + search.request_count();
    Ok(report)
}

/// Map user input to a page id: `1..=suggestions.len()` picks a suggestion,
/// anything else is taken as a page id.
pub fn resolve_page_id(input: &str, suggestions: &[PageSummary]) -> Result<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        bail!("page selection requires a suggestion number or a page id");
    }
    if let Ok(index) = trimmed.parse::<usize>()
        && (1..=suggestions.len()).contains(&index)
    {
        return Ok(suggestions[index - 1].id.clone());
    }
    Ok(trimmed.to_string())
}
