/// Escape text for an HTML field (Azure DevOps descriptions).
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Titled sections as `<h3>` + paragraphs, newlines kept as `<br>`.
pub fn sections(sections: &[(&str, &str)], footer: Option<&str>) -> String {
    let mut html = String::new();
    for (heading, body) in sections {
        html.push_str(&format!("<h3>{}</h3>", escape(heading)));
        for block in body.split("\n\n").map(str::trim).filter(|b| !b.is_empty()) {
            html.push_str(&format!("<p>{}</p>", escape(block).replace('\n', "<br>")));
        }
    }
    if let Some(footer) = footer.filter(|f| !f.is_empty()) {
        html.push_str(&format!("<p><small>{}</small></p>", escape(footer)));
    }
    html
}
