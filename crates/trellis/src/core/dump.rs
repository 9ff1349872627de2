use std::io::{Error as IoError, Write};

use termcolor::{Buffer, Color, ColorSpec, WriteColor};

use crate::core::{
    NodeId, Tree,
    error::{Error, Result},
    value::Value,
};

/// Map an I/O failure on the dump buffer.
fn io(err: IoError) -> Error {
    Error::Internal(err.to_string())
}

/// Traverses a subtree and returns a string showing each node's type, id,
/// flags, scalar fields and event bindings. This is a debug function.
pub fn dump(tree: &Tree, root: NodeId) -> Result<String> {
    let mut buffer = Buffer::ansi();
    dump_node(&mut buffer, tree, root, 0)?;
    Ok(String::from_utf8_lossy(buffer.as_slice()).into_owned())
}

/// Uncoloured variant of [`dump`].
pub fn dump_plain(tree: &Tree, root: NodeId) -> Result<String> {
    let mut buffer = Buffer::no_color();
    dump_node(&mut buffer, tree, root, 0)?;
    Ok(String::from_utf8_lossy(buffer.as_slice()).into_owned())
}

/// Helper to write an indented, colored label followed by a value.
fn write_field(buffer: &mut Buffer, indent: &str, label: &str, value: &str) -> Result<()> {
    write!(buffer, "{indent}  ").map_err(io)?;
    buffer
        .set_color(ColorSpec::new().set_fg(Some(Color::Green)))
        .map_err(io)?;
    write!(buffer, "{label}").map_err(io)?;
    buffer.reset().map_err(io)?;
    writeln!(buffer, " {value}").map_err(io)
}

/// Walk a node subtree and emit formatted debug output.
fn dump_node(buffer: &mut Buffer, tree: &Tree, id: NodeId, level: usize) -> Result<()> {
    let node = tree.node(id)?;
    let indent = "    ".repeat(level);

    write!(buffer, "{indent}").map_err(io)?;
    buffer
        .set_color(ColorSpec::new().set_fg(Some(Color::Cyan)).set_bold(true))
        .map_err(io)?;
    write!(buffer, "{} {}", node.plugin_type(), node.node_id()).map_err(io)?;
    buffer.reset().map_err(io)?;

    let mut indicators = vec![];
    if !node.is_visible() {
        indicators.push(("hidden", Color::Yellow));
    }
    if node.focusable() == Some(true) {
        indicators.push(("focusable", Color::Magenta));
    }
    if node.disable_events().blocks_all() {
        indicators.push(("events disabled", Color::Red));
    }
    for (i, (indicator, color)) in indicators.iter().enumerate() {
        write!(buffer, "{}", if i == 0 { " " } else { ", " }).map_err(io)?;
        buffer
            .set_color(ColorSpec::new().set_fg(Some(*color)))
            .map_err(io)?;
        write!(buffer, "{indicator}").map_err(io)?;
        buffer.reset().map_err(io)?;
    }
    writeln!(buffer).map_err(io)?;

    for (name, value) in node.fields() {
        match value {
            Value::Node(_) => {}
            Value::Array(items) if items.iter().any(|v| v.as_node().is_some()) => {}
            other => write_field(buffer, &indent, &format!("{name}:"), &other.to_json().to_string())?,
        }
    }
    if node.events_count() > 0 {
        let events = node
            .events()
            .iter()
            .map(|(event, handler)| format!("{event}={handler}"))
            .collect::<Vec<_>>()
            .join(", ");
        write_field(buffer, &indent, "events:", &events)?;
    }

    for child in tree.children(id) {
        if tree.parent(child) == Some(id) {
            dump_node(buffer, tree, child, level + 1)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{props, testing};

    #[test]
    fn dump_subtree() -> Result<()> {
        let store = testing::store()?;
        let label = store.create("Label", props! { text: "hi" })?;
        let panel = store.create("Panel", props! { content: label, visible: false })?;
        let text = store.read(|tree| dump_plain(tree, panel))?;
        let (p, l) = (
            store.display_id(panel).unwrap_or_default(),
            store.display_id(label).unwrap_or_default(),
        );
        assert_eq!(
            text,
            format!("Panel {p} hidden\n  items: []\n    Label {l}\n      text: \"hi\"\n")
        );
        let coloured = store.read(|tree| dump(tree, panel))?;
        assert!(coloured.contains("\u{1b}["));
        Ok(())
    }
}
