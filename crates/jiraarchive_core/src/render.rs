use crate::jira::Issue;

/// Fixed settings stamped into every single-issue Jira macro.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceTemplate {
    pub macro_id: String,
    pub server_name: String,
    pub server_id: String,
    pub columns: String,
}

/// Render a static single-issue Jira macro for `issue_key`.
pub fn render_static_reference(template: &ReferenceTemplate, issue_key: &str) -> String {
    format!(
        "<ac:structured-macro ac:name=\"jira\" ac:schema-version=\"1\" ac:macro-id=\"{macro_id}\">\
         <ac:parameter ac:name=\"server\">{server_name}</ac:parameter>\
         <ac:parameter ac:name=\"columns\">{columns}</ac:parameter>\
         <ac:parameter ac:name=\"serverId\">{server_id}</ac:parameter>\
         <ac:parameter ac:name=\"key\">{issue_key}</ac:parameter>\
         </ac:structured-macro>",
        macro_id = template.macro_id,
        server_name = template.server_name,
        columns = template.columns,
        server_id = template.server_id,
    )
}

/// One `<p>` wrapped reference per issue, in the order given.
pub fn render_replacement(template: &ReferenceTemplate, issues: &[Issue]) -> String {
    issues
        .iter()
        .map(|issue| format!("<p>{}</p>", render_static_reference(template, &issue.key)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::widgets::find_widgets;

    fn template() -> ReferenceTemplate {
        ReferenceTemplate {
            macro_id: "macro-1".to_string(),
            server_name: "Test Tracker".to_string(),
            server_id: "server-1".to_string(),
            columns: "key,summary,status".to_string(),
        }
    }

    fn issue(key: &str) -> Issue {
        Issue {
            key: key.to_string(),
            summary: format!("summary of {key}"),
        }
    }

    #[test]
    fn static_reference_embeds_template_values() {
        let markup = render_static_reference(&template(), "ABC-7");
        assert!(markup.starts_with("<ac:structured-macro ac:name=\"jira\""));
        assert!(markup.contains("ac:macro-id=\"macro-1\""));
        assert!(markup.contains("<ac:parameter ac:name=\"server\">Test Tracker</ac:parameter>"));
        assert!(markup.contains("<ac:parameter ac:name=\"serverId\">server-1</ac:parameter>"));
        assert!(markup.contains("<ac:parameter ac:name=\"columns\">key,summary,status</ac:parameter>"));
        assert!(markup.contains("<ac:parameter ac:name=\"key\">ABC-7</ac:parameter>"));
        assert!(markup.ends_with("</ac:structured-macro>"));
    }

    #[test]
    fn replacement_wraps_each_issue_in_a_paragraph() {
        let markup = render_replacement(&template(), &[issue("ABC-1"), issue("ABC-2")]);
        assert_eq!(markup.matches("<p><ac:structured-macro").count(), 2);
        assert!(markup.find("ABC-1").expect("first") < markup.find("ABC-2").expect("second"));
        assert!(!markup.contains("jqlQuery"));
    }

    #[test]
    fn replacement_for_no_issues_is_empty() {
        assert_eq!(render_replacement(&template(), &[]), "");
    }

    #[test]
    fn rendered_references_are_not_list_widgets() {
        let markup = render_replacement(&template(), &[issue("ABC-1")]);
        assert!(find_widgets(&markup).expect("scan").is_empty());
    }
}
