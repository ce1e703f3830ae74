use crate::types::NodeType;

/// Aspects whose role is fixed by registration.
const ASPECT_ROLES: [(&str, NodeType); 5] = [
    ("lxmf.propagation", NodeType::PropagationNode),
    ("lxmf.delivery", NodeType::Peer),
    ("nomadnetwork.node", NodeType::Node),
    ("call.audio", NodeType::Peer),
    ("rmsp.maps", NodeType::Node),
];

/// Substrings marking app data written by a known companion client.
const COMPANION_APP_MARKERS: [&str; 3] = ["columba", "sideband", "meshchat"];

/// Infer the role of an announcing destination from its announce metadata.
///
/// The aspect table is authoritative; everything past it is a best-effort
/// guess from free-form app data and can misclassify when unrelated
/// applications share a naming convention. Announces carrying a known aspect
/// never reach the guessing steps.
pub fn classify_node_type(app_data: Option<&[u8]>, aspect: Option<&str>) -> NodeType {
    if let Some(aspect) = aspect
        && let Some(role) = aspect_role(aspect)
    {
        return role;
    }

    let Some(data) = app_data.filter(|data| !data.is_empty()) else {
        return NodeType::Node;
    };

    if let Ok(text) = std::str::from_utf8(data) {
        let lowered = text.to_ascii_lowercase();
        if COMPANION_APP_MARKERS
            .iter()
            .any(|marker| lowered.contains(marker))
        {
            return NodeType::Peer;
        }
        if lowered.contains("node") || text.contains("'s") {
            return NodeType::Node;
        }
        // remaining text payloads read as display names
        return NodeType::Peer;
    }

    if is_structured_binary(data[0]) {
        return NodeType::PropagationNode;
    }

    NodeType::Peer
}

fn aspect_role(aspect: &str) -> Option<NodeType> {
    let lowered = aspect.to_ascii_lowercase();
    ASPECT_ROLES
        .iter()
        .find(|(known, _)| *known == lowered)
        .map(|(_, role)| *role)
}

// msgpack fixmap/fixarray leading bytes plus the 16/32-bit map and array forms
fn is_structured_binary(first: u8) -> bool {
    matches!(first, 0x80..=0x9F | 0xDC..=0xDF)
}
