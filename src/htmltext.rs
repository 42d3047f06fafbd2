//! Plain-text rendering of app description HTML.

use ego_tree::NodeRef;
use scraper::{Html, Node};

/// Convert an HTML description fragment to readable text.
///
/// `<br>` becomes a newline, and a newline is appended after each
/// paragraph. All other markup is dropped, keeping only text content.
pub fn text_from_html(html: &str) -> String {
    let fragment = Html::parse_fragment(html);

    let mut out = String::new();
    for child in fragment.tree.root().children() {
        visit(child, &mut out);
    }
    out
}

fn visit(node: NodeRef<'_, Node>, out: &mut String) {
    match node.value() {
        Node::Text(text) => out.push_str(text),
        Node::Element(element) => {
            if element.name() == "br" {
                out.push('\n');
            }

            for child in node.children() {
                visit(child, out);
            }

            if element.name() == "p" {
                out.push('\n');
            }
        }
        _ => {
            for child in node.children() {
                visit(child, out);
            }
        }
    }
}
