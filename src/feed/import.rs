use std::path::Path;

use opml::{Outline, OPML};

use crate::error::Result;

/// A feed subscription read from an OPML export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpmlFeed {
    pub name: String,
    pub url: String,
}

pub fn parse_opml_file(path: &Path) -> Result<Vec<OpmlFeed>> {
    let content = std::fs::read_to_string(path)?;
    parse_opml(&content)
}

pub fn parse_opml(content: &str) -> Result<Vec<OpmlFeed>> {
    let document = OPML::from_str(content)?;
    let mut feeds = Vec::new();
    collect_outlines(&document.body.outlines, &mut feeds);
    Ok(feeds)
}

// Category folders nest outlines; only leaves with an xmlUrl are feeds.
fn collect_outlines(outlines: &[Outline], feeds: &mut Vec<OpmlFeed>) {
    for outline in outlines {
        if let Some(url) = &outline.xml_url {
            let name = outline
                .title
                .clone()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| outline.text.clone());
            feeds.push(OpmlFeed {
                name,
                url: url.clone(),
            });
        }
        collect_outlines(&outline.outlines, feeds);
    }
}
