use std::ops::Range;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const MACRO_OPEN_PREFIX: &str = "<ac:structured-macro";
const MACRO_CLOSE: &str = "</ac:structured-macro>";
const JIRA_NAME_ATTR: &str = "ac:name=\"jira\"";
const QUERY_PARAM_OPEN: &str = "<ac:parameter ac:name=\"jqlQuery\">";
const PARAM_CLOSE: &str = "</ac:parameter>";

const STRICT_ENTITIES: [(&str, char); 5] = [
    ("&amp;", '&'),
    ("&quot;", '"'),
    ("&apos;", '\''),
    ("&gt;", '>'),
    ("&lt;", '<'),
];

/// One Jira list widget found in a page body.
///
/// `start..stop` is a byte range covering the whole macro, from the opening
/// `<ac:structured-macro` through the closing tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidgetSpan {
    pub start: usize,
    pub stop: usize,
    pub query: String,
}

impl WidgetSpan {
    pub fn markup<'a>(&self, body: &'a str) -> &'a str {
        &body[self.start..self.stop]
    }
}

/// How `jqlQuery` parameter text is unescaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityDecoding {
    /// Replace the five entity names without their `;`, then drop every `;`
    /// left in the text. Matches how already archived pages were produced.
    #[default]
    Legacy,
    /// Decode `&amp;` `&quot;` `&apos;` `&gt;` `&lt;` in one pass and leave
    /// any other semicolon alone.
    Strict,
}

impl EntityDecoding {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::Strict => "strict",
        }
    }

    pub fn decode(self, raw: &str) -> String {
        match self {
            Self::Legacy => decode_legacy(raw),
            Self::Strict => decode_strict(raw),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WidgetError {
    #[error("jira widget opened at byte {offset} has no closing </ac:structured-macro> tag")]
    UnclosedWidget { offset: usize },
    #[error("jqlQuery parameter at byte {offset} has no closing </ac:parameter> tag")]
    UnclosedQuery { offset: usize },
}

#[derive(Debug, Clone, Copy)]
enum ScanState {
    SeekingOpen { from: usize },
    SeekingClose { start: usize, tag_end: usize },
    SeekingQuery { start: usize, stop: usize },
}

/// Find every Jira list widget in `body` using legacy query decoding.
pub fn find_widgets(body: &str) -> Result<Vec<WidgetSpan>, WidgetError> {
    find_widgets_with(body, EntityDecoding::default())
}

/// Find every Jira list widget in `body`, in document order.
///
/// Jira macros without a `jqlQuery` parameter (single issue references) are
/// skipped. The closing tag is always searched for after the current opening
/// tag, and scanning resumes at the end of each macro, so spans never overlap.
pub fn find_widgets_with(
    body: &str,
    decoding: EntityDecoding,
) -> Result<Vec<WidgetSpan>, WidgetError> {
    let mut widgets = Vec::new();
    let mut state = ScanState::SeekingOpen { from: 0 };

    loop {
        state = match state {
            ScanState::SeekingOpen { from } => match find_jira_open_tag(body, from) {
                Some((start, tag_end)) => ScanState::SeekingClose { start, tag_end },
                None => break,
            },
            ScanState::SeekingClose { start, tag_end } => {
                let close = body[tag_end..]
                    .find(MACRO_CLOSE)
                    .ok_or(WidgetError::UnclosedWidget { offset: start })?;
                ScanState::SeekingQuery {
                    start,
                    stop: tag_end + close + MACRO_CLOSE.len(),
                }
            }
            ScanState::SeekingQuery { start, stop } => {
                if let Some(query) = extract_query(body, start, stop, decoding)? {
                    widgets.push(WidgetSpan { start, stop, query });
                }
                ScanState::SeekingOpen { from: stop }
            }
        };
    }

    Ok(widgets)
}

/// Replace every span in `body` with `replacement_of(span)`.
pub fn rewrite<F>(body: &str, spans: &[WidgetSpan], mut replacement_of: F) -> String
where
    F: FnMut(&WidgetSpan) -> String,
{
    let replacements = spans
        .iter()
        .map(|span| (span.start..span.stop, replacement_of(span)))
        .collect::<Vec<_>>();
    let edits = replacements
        .iter()
        .map(|(range, text)| (range.clone(), text.as_str()))
        .collect::<Vec<_>>();
    splice(body, &edits)
}

/// Apply non-overlapping byte-range edits to a copy of `body`.
///
/// Edits are applied from the highest start down so offsets of the edits
/// still waiting stay valid; the order of `edits` does not matter.
pub fn splice(body: &str, edits: &[(Range<usize>, &str)]) -> String {
    let mut ordered = edits.iter().collect::<Vec<_>>();
    ordered.sort_by(|left, right| right.0.start.cmp(&left.0.start));

    let mut output = body.to_string();
    for (range, replacement) in ordered {
        output.replace_range(range.clone(), replacement);
    }
    output
}

// Returns (tag start, one past the tag's `>`) for the next Jira macro tag.
fn find_jira_open_tag(body: &str, from: usize) -> Option<(usize, usize)> {
    let mut cursor = from;
    while let Some(relative) = body[cursor..].find(MACRO_OPEN_PREFIX) {
        let start = cursor + relative;
        let tag_end = start + body[start..].find('>')? + 1;
        if body[start..tag_end].contains(JIRA_NAME_ATTR) {
            return Some((start, tag_end));
        }
        cursor = start + MACRO_OPEN_PREFIX.len();
    }
    None
}

fn extract_query(
    body: &str,
    start: usize,
    stop: usize,
    decoding: EntityDecoding,
) -> Result<Option<String>, WidgetError> {
    let widget = &body[start..stop];
    let Some(param_at) = widget.find(QUERY_PARAM_OPEN) else {
        return Ok(None);
    };
    let value_start = param_at + QUERY_PARAM_OPEN.len();
    let value_len = widget[value_start..]
        .find(PARAM_CLOSE)
        .ok_or(WidgetError::UnclosedQuery {
            offset: start + param_at,
        })?;
    let raw = &widget[value_start..value_start + value_len];
    Ok(Some(decoding.decode(raw)))
}

fn decode_legacy(raw: &str) -> String {
    raw.replace("&amp", "&")
        .replace("&quot", "\"")
        .replace("&apos", "'")
        .replace("&gt", ">")
        .replace("&lt", "<")
        .replace(';', "")
}

fn decode_strict(raw: &str) -> String {
    let mut output = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        output.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        match STRICT_ENTITIES
            .iter()
            .find(|(entity, _)| tail.starts_with(entity))
        {
            Some((entity, decoded)) => {
                output.push(*decoded);
                rest = &tail[entity.len()..];
            }
            None => {
                output.push('&');
                rest = &tail[1..];
            }
        }
    }
    output.push_str(rest);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_widget(query: &str) -> String {
        format!(
            "<ac:structured-macro ac:name=\"jira\" ac:schema-version=\"1\" ac:macro-id=\"m-1\">\
             <ac:parameter ac:name=\"server\">Tracker</ac:parameter>\
             <ac:parameter ac:name=\"jqlQuery\">{query}</ac:parameter>\
             </ac:structured-macro>"
        )
    }

    fn single_issue_widget(key: &str) -> String {
        format!(
            "<ac:structured-macro ac:name=\"jira\" ac:schema-version=\"1\">\
             <ac:parameter ac:name=\"key\">{key}</ac:parameter>\
             </ac:structured-macro>"
        )
    }

    #[test]
    fn finds_two_widgets_in_document_order() {
        let first = list_widget("project = ABC");
        let second = list_widget("project = XYZ");
        let body = format!("<p>intro</p>{first}<p>middle</p>{second}<p>outro</p>");

        let widgets = find_widgets(&body).expect("scan");

        assert_eq!(widgets.len(), 2);
        assert!(widgets[0].start < widgets[1].start);
        assert!(widgets[0].stop <= widgets[1].start);
        assert_eq!(widgets[0].markup(&body), first);
        assert_eq!(widgets[1].markup(&body), second);
        assert_eq!(widgets[0].query, "project = ABC");
        assert_eq!(widgets[1].query, "project = XYZ");
    }

    #[test]
    fn opening_tag_attributes_may_come_in_any_order() {
        let body = "<ac:structured-macro ac:macro-id=\"m-2\" ac:name=\"jira\">\
                    <ac:parameter ac:name=\"jqlQuery\">status = Done</ac:parameter>\
                    </ac:structured-macro>";
        let widgets = find_widgets(body).expect("scan");
        assert_eq!(widgets.len(), 1);
        assert_eq!(widgets[0].start, 0);
        assert_eq!(widgets[0].stop, body.len());
        assert_eq!(widgets[0].query, "status = Done");
    }

    #[test]
    fn legacy_decoding_unescapes_entities_and_drops_semicolons() {
        let body = list_widget("priority &gt; High &amp; status = Open");
        let widgets = find_widgets(&body).expect("scan");
        assert_eq!(widgets[0].query, "priority > High & status = Open");
    }

    #[test]
    fn legacy_decoding_removes_literal_semicolons() {
        assert_eq!(
            EntityDecoding::Legacy.decode("summary ~ &quot;a;b&quot;"),
            "summary ~ \"ab\""
        );
    }

    #[test]
    fn strict_decoding_keeps_literal_semicolons() {
        assert_eq!(
            EntityDecoding::Strict.decode("summary ~ &quot;a;b&quot; &amp;gt; &nbsp;"),
            "summary ~ \"a;b\" &gt; &nbsp;"
        );
        assert_eq!(
            EntityDecoding::Strict.decode("a &lt; b &apos;c&apos;"),
            "a < b 'c'"
        );
    }

    #[test]
    fn widget_without_query_is_skipped() {
        let body = format!("<p>{}</p>", single_issue_widget("ABC-1"));
        assert!(find_widgets(&body).expect("scan").is_empty());
    }

    #[test]
    fn single_issue_widgets_between_lists_are_skipped() {
        let body = format!(
            "{}{}{}",
            list_widget("a = 1"),
            single_issue_widget("ABC-2"),
            list_widget("b = 2")
        );
        let widgets = find_widgets(&body).expect("scan");
        let queries = widgets.iter().map(|w| w.query.as_str()).collect::<Vec<_>>();
        assert_eq!(queries, vec!["a = 1", "b = 2"]);
    }

    #[test]
    fn other_macros_are_ignored_but_their_contents_are_scanned() {
        let body = format!(
            "<ac:structured-macro ac:name=\"info\"><ac:rich-text-body>{}</ac:rich-text-body></ac:structured-macro>",
            list_widget("c = 3")
        );
        let widgets = find_widgets(&body).expect("scan");
        assert_eq!(widgets.len(), 1);
        assert_eq!(widgets[0].query, "c = 3");
        assert!(widgets[0].start > 0);
    }

    #[test]
    fn body_without_widgets_yields_empty_result() {
        assert!(find_widgets("<p>plain page</p>").expect("scan").is_empty());
        assert!(find_widgets("").expect("scan").is_empty());
    }

    #[test]
    fn unclosed_widget_fails_with_offset() {
        let body = format!(
            "{}<p>x</p><ac:structured-macro ac:name=\"jira\"><ac:parameter ac:name=\"jqlQuery\">q</ac:parameter>",
            list_widget("ok")
        );
        let offset = body.rfind("<ac:structured-macro").expect("second tag");

        let error = find_widgets(&body).expect_err("must fail");

        assert_eq!(error, WidgetError::UnclosedWidget { offset });
        assert!(error.to_string().contains(&offset.to_string()));
    }

    #[test]
    fn unclosed_query_parameter_fails() {
        let body = "<ac:structured-macro ac:name=\"jira\">\
                    <ac:parameter ac:name=\"jqlQuery\">project = ABC\
                    </ac:structured-macro>";
        let error = find_widgets(body).expect_err("must fail");
        assert!(matches!(error, WidgetError::UnclosedQuery { .. }));
    }

    #[test]
    fn rewrite_with_no_spans_is_identity() {
        let body = "<p>nothing here</p>";
        let output = rewrite(body, &[], |_| "unused".to_string());
        assert_eq!(output, body);
    }

    #[test]
    fn rewrite_with_original_markup_round_trips() {
        let body = format!(
            "<h1>Sprint</h1>{}<p>between</p>{}",
            list_widget("sprint = 1"),
            list_widget("sprint = 2")
        );
        let widgets = find_widgets(&body).expect("scan");
        let output = rewrite(&body, &widgets, |span| span.markup(&body).to_string());
        assert_eq!(output, body);
    }

    #[test]
    fn shorter_replacements_keep_surrounding_text_intact() {
        let body = format!(
            "<p>before</p>{}<p>between</p>{}<p>after</p>",
            list_widget("first"),
            list_widget("second")
        );
        let widgets = find_widgets(&body).expect("scan");

        let output = rewrite(&body, &widgets, |span| format!("[{}]", span.query));

        assert_eq!(
            output,
            "<p>before</p>[first]<p>between</p>[second]<p>after</p>"
        );
        assert!(output.starts_with(&body[..widgets[0].start]));
    }

    #[test]
    fn rewrite_applies_spans_regardless_of_input_order() {
        let body = format!("{}-{}", list_widget("one"), list_widget("two"));
        let mut widgets = find_widgets(&body).expect("scan");
        widgets.reverse();

        let output = rewrite(&body, &widgets, |span| span.query.to_uppercase());

        assert_eq!(output, "ONE-TWO");
    }

    #[test]
    fn splice_applies_growing_and_shrinking_edits() {
        let body = "aaXXbbYYYYcc";
        let output = splice(body, &[(2..4, "long-one"), (6..10, "")]);
        assert_eq!(output, "aalong-onebbcc");

        let reordered = splice(body, &[(6..10, ""), (2..4, "long-one")]);
        assert_eq!(reordered, output);
        assert_eq!(splice(body, &[]), body);
    }
}
