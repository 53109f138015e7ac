use tidewire_proto::{
    decode_batch, encode_batch, AttributeValue, EditKind, FrameKind, ReferenceFrame, RenderBatch,
    RenderTreeEdit,
};
use tidewire_shadow::{apply_batch, apply_edits, ApplyError, NodeKind, ShadowTree, SnapshotNode};

const ROOT_COMPONENT: u32 = 1;

fn tree_with_root_component() -> ShadowTree {
    let mut tree = ShadowTree::new();
    tree.attach_root_component(ROOT_COMPONENT);
    tree
}

fn component_children(tree: &ShadowTree, component_id: u32) -> Vec<SnapshotNode> {
    let container = tree.component_container(component_id).expect("component attached");
    tree.snapshot(container).expect("live container").children
}

fn text_list(tree: &ShadowTree) -> Vec<String> {
    component_children(tree, ROOT_COMPONENT)
        .into_iter()
        .map(|node| match node.kind {
            NodeKind::Text { content } => content,
            other => other.label().to_string(),
        })
        .collect()
}

fn seed_texts(tree: &mut ShadowTree, texts: &[&str]) {
    let mut batch = RenderBatch::new();
    let edits = texts
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let frame = batch.push_frame(ReferenceFrame::text(*text));
            RenderTreeEdit::prepend(i as u32, frame)
        })
        .collect();
    batch.push_diff(ROOT_COMPONENT, edits);
    apply_batch(tree, &batch).expect("seed");
}

#[test_timeout::timeout]
fn prepend_element_with_text_child() {
    let mut tree = tree_with_root_component();
    let mut batch = RenderBatch::new();
    let p = batch.push_frame(ReferenceFrame::element("p", 2));
    batch.push_frame(ReferenceFrame::text("Hello world!"));
    batch.push_diff(ROOT_COMPONENT, vec![RenderTreeEdit::prepend(0, p)]);

    apply_batch(&mut tree, &batch).expect("apply");

    assert_eq!(
        component_children(&tree, ROOT_COMPONENT),
        vec![SnapshotNode::element(
            "p",
            vec![SnapshotNode::text("Hello world!")]
        )]
    );
    assert_eq!(tree.snapshot_root().to_string(), "<p>Hello world!</p>");
}

#[test_timeout::timeout]
fn set_attribute_on_text_node_is_rejected_without_changes() {
    let mut tree = tree_with_root_component();
    seed_texts(&mut tree, &["hi"]);
    let before = tree.snapshot_root();

    let mut batch = RenderBatch::new();
    let attr = batch.push_frame(ReferenceFrame::attribute("class", "x"));
    batch.push_diff(ROOT_COMPONENT, vec![RenderTreeEdit::set_attribute(0, attr)]);

    assert_eq!(
        apply_batch(&mut tree, &batch),
        Err(ApplyError::InvalidEditTarget {
            edit: EditKind::SetAttribute,
            expected: "element",
            found: "text",
        })
    );
    assert_eq!(tree.snapshot_root(), before);
}

#[test_timeout::timeout]
fn same_batch_on_equal_trees_is_deterministic() {
    let mut batch = RenderBatch::new();
    let ul = batch.push_frame(ReferenceFrame::element("ul", 5));
    batch.push_frame(ReferenceFrame::attribute("class", "items"));
    batch.push_frame(ReferenceFrame::element("li", 2));
    batch.push_frame(ReferenceFrame::text("one"));
    batch.push_frame(ReferenceFrame::Region { subtree_length: 1 });
    let markup = batch.push_frame(ReferenceFrame::markup("<hr/>"));
    batch.push_diff(
        ROOT_COMPONENT,
        vec![
            RenderTreeEdit::prepend(0, ul),
            RenderTreeEdit::prepend(1, markup),
        ],
    );
    let bytes = encode_batch(&batch);

    let mut left = tree_with_root_component();
    let mut right = tree_with_root_component();
    apply_batch(&mut left, &decode_batch(&bytes).expect("decode")).expect("left");
    apply_batch(&mut right, &decode_batch(&bytes).expect("decode")).expect("right");
    assert_eq!(left.snapshot_root(), right.snapshot_root());
    assert_eq!(
        left.snapshot_root().to_string(),
        "<ul class=\"items\"><li>one</li></ul><hr/>"
    );
}

#[test_timeout::timeout]
fn nested_edits_step_in_and_out() {
    let mut tree = tree_with_root_component();
    let mut batch = RenderBatch::new();
    let div = batch.push_frame(ReferenceFrame::element("div", 3));
    batch.push_frame(ReferenceFrame::element("span", 2));
    batch.push_frame(ReferenceFrame::text("old"));
    batch.push_diff(ROOT_COMPONENT, vec![RenderTreeEdit::prepend(0, div)]);
    apply_batch(&mut tree, &batch).expect("initial");

    let mut batch = RenderBatch::new();
    let new_text = batch.push_frame(ReferenceFrame::text("new"));
    let footer = batch.push_frame(ReferenceFrame::text("footer"));
    batch.push_diff(
        ROOT_COMPONENT,
        vec![
            RenderTreeEdit::step_in(0),
            RenderTreeEdit::step_in(0),
            RenderTreeEdit::update_text(0, new_text),
            RenderTreeEdit::StepOut,
            RenderTreeEdit::StepOut,
            RenderTreeEdit::prepend(1, footer),
        ],
    );
    apply_batch(&mut tree, &batch).expect("update");
    assert_eq!(
        tree.snapshot_root().to_string(),
        "<div><span>new</span></div>footer"
    );
}

#[test_timeout::timeout]
fn unbalanced_cursor_is_an_error() {
    let mut tree = tree_with_root_component();
    let mut batch = RenderBatch::new();
    batch.push_diff(ROOT_COMPONENT, vec![RenderTreeEdit::StepOut]);
    assert_eq!(
        apply_batch(&mut tree, &batch),
        Err(ApplyError::UnbalancedStepInOut)
    );

    let mut batch = RenderBatch::new();
    let div = batch.push_frame(ReferenceFrame::element("div", 1));
    batch.push_diff(
        ROOT_COMPONENT,
        vec![RenderTreeEdit::prepend(0, div), RenderTreeEdit::step_in(0)],
    );
    assert_eq!(
        apply_batch(&mut tree, &batch),
        Err(ApplyError::UnbalancedStepInOut)
    );
}

#[test_timeout::timeout]
fn step_in_requires_a_container() {
    let mut tree = tree_with_root_component();
    seed_texts(&mut tree, &["leaf"]);
    let mut batch = RenderBatch::new();
    batch.push_diff(
        ROOT_COMPONENT,
        vec![RenderTreeEdit::step_in(0), RenderTreeEdit::StepOut],
    );
    assert_eq!(
        apply_batch(&mut tree, &batch),
        Err(ApplyError::InvalidEditTarget {
            edit: EditKind::StepIn,
            expected: "container",
            found: "text",
        })
    );
}

#[test_timeout::timeout]
fn remove_and_out_of_range_indices() {
    let mut tree = tree_with_root_component();
    seed_texts(&mut tree, &["a", "b", "c"]);

    let mut batch = RenderBatch::new();
    batch.push_diff(ROOT_COMPONENT, vec![RenderTreeEdit::remove(1)]);
    apply_batch(&mut tree, &batch).expect("remove");
    assert_eq!(text_list(&tree), ["a", "c"]);

    let mut batch = RenderBatch::new();
    batch.push_diff(ROOT_COMPONENT, vec![RenderTreeEdit::remove(2)]);
    assert_eq!(
        apply_batch(&mut tree, &batch),
        Err(ApplyError::OutOfRangeIndex { index: 2, len: 2 })
    );

    let mut batch = RenderBatch::new();
    let text = batch.push_frame(ReferenceFrame::text("z"));
    batch.push_diff(ROOT_COMPONENT, vec![RenderTreeEdit::prepend(3, text)]);
    assert_eq!(
        apply_batch(&mut tree, &batch),
        Err(ApplyError::OutOfRangeIndex { index: 3, len: 2 })
    );
    assert_eq!(text_list(&tree), ["a", "c"]);
}

#[test_timeout::timeout]
fn permutation_list_reorders_siblings() {
    let mut tree = tree_with_root_component();
    seed_texts(&mut tree, &["a", "b", "c"]);

    let mut batch = RenderBatch::new();
    batch.push_diff(
        ROOT_COMPONENT,
        vec![
            RenderTreeEdit::permute(0, 2),
            RenderTreeEdit::permute(1, 0),
            RenderTreeEdit::permute(2, 1),
            RenderTreeEdit::PermutationListEnd,
        ],
    );
    apply_batch(&mut tree, &batch).expect("permute");
    assert_eq!(text_list(&tree), ["b", "c", "a"]);
}

#[test_timeout::timeout]
fn permutation_must_end_before_other_edits() {
    let mut tree = tree_with_root_component();
    seed_texts(&mut tree, &["a", "b"]);

    let mut batch = RenderBatch::new();
    batch.push_diff(
        ROOT_COMPONENT,
        vec![RenderTreeEdit::permute(0, 1), RenderTreeEdit::remove(0)],
    );
    assert_eq!(
        apply_batch(&mut tree, &batch),
        Err(ApplyError::UnterminatedPermutation)
    );

    let mut batch = RenderBatch::new();
    batch.push_diff(
        ROOT_COMPONENT,
        vec![RenderTreeEdit::permute(0, 1), RenderTreeEdit::permute(1, 0)],
    );
    apply_batch(&mut tree, &batch).expect("open list is discarded");
    assert_eq!(text_list(&tree), ["a", "b"]);
}

#[test_timeout::timeout]
fn attributes_and_event_handlers_are_tracked() {
    let mut tree = tree_with_root_component();
    let mut batch = RenderBatch::new();
    let button = batch.push_frame(ReferenceFrame::element("button", 3));
    batch.push_frame(ReferenceFrame::event_handler("onclick", 77));
    batch.push_frame(ReferenceFrame::text("go"));
    batch.push_diff(ROOT_COMPONENT, vec![RenderTreeEdit::prepend(0, button)]);
    apply_batch(&mut tree, &batch).expect("insert");
    assert!(tree.has_event_handler(77));

    let mut batch = RenderBatch::new();
    let disabled = batch.push_frame(ReferenceFrame::attribute("disabled", ""));
    batch.push_diff(
        ROOT_COMPONENT,
        vec![
            RenderTreeEdit::set_attribute(0, disabled),
            RenderTreeEdit::remove_attribute(0, "onclick"),
        ],
    );
    batch.dispose_event_handler(77);
    apply_batch(&mut tree, &batch).expect("update");

    assert!(!tree.has_event_handler(77));
    let children = component_children(&tree, ROOT_COMPONENT);
    match &children[0].kind {
        NodeKind::Element { attributes, .. } => {
            assert_eq!(
                attributes.get("disabled"),
                Some(&AttributeValue::Text(String::new()))
            );
            assert!(!attributes.contains_key("onclick"));
        }
        other => panic!("expected element, got {other:?}"),
    }
}

#[test_timeout::timeout]
fn update_markup_replaces_node() {
    let mut tree = tree_with_root_component();
    let mut batch = RenderBatch::new();
    let old = batch.push_frame(ReferenceFrame::markup("<i>a</i>"));
    batch.push_diff(ROOT_COMPONENT, vec![RenderTreeEdit::prepend(0, old)]);
    apply_batch(&mut tree, &batch).expect("insert");

    let mut batch = RenderBatch::new();
    let new = batch.push_frame(ReferenceFrame::markup("<b>b</b>"));
    batch.push_diff(ROOT_COMPONENT, vec![RenderTreeEdit::update_markup(0, new)]);
    apply_batch(&mut tree, &batch).expect("update");
    assert_eq!(tree.snapshot_root().to_string(), "<b>b</b>");

    seed_texts(&mut tree, &["t"]);
    let mut batch = RenderBatch::new();
    let again = batch.push_frame(ReferenceFrame::markup("<u>c</u>"));
    batch.push_diff(ROOT_COMPONENT, vec![RenderTreeEdit::update_markup(0, again)]);
    assert_eq!(
        apply_batch(&mut tree, &batch),
        Err(ApplyError::InvalidEditTarget {
            edit: EditKind::UpdateMarkup,
            expected: "markup",
            found: "text",
        })
    );
}

#[test_timeout::timeout]
fn child_components_register_and_dispose() {
    let mut tree = tree_with_root_component();
    let mut batch = RenderBatch::new();
    let section = batch.push_frame(ReferenceFrame::element("section", 3));
    batch.push_frame(ReferenceFrame::Component {
        component_id: 2,
        subtree_length: 2,
    });
    batch.push_frame(ReferenceFrame::attribute("Title", "skipped parameter"));
    batch.push_diff(ROOT_COMPONENT, vec![RenderTreeEdit::prepend(0, section)]);
    apply_batch(&mut tree, &batch).expect("insert");
    assert!(tree.component_container(2).is_some());

    let mut batch = RenderBatch::new();
    let text = batch.push_frame(ReferenceFrame::text("child"));
    batch.push_diff(2, vec![RenderTreeEdit::prepend(0, text)]);
    apply_batch(&mut tree, &batch).expect("child render");
    assert_eq!(
        tree.snapshot_root().to_string(),
        "<section>child</section>"
    );

    let mut batch = RenderBatch::new();
    batch.dispose_component(2);
    apply_batch(&mut tree, &batch).expect("dispose");
    assert_eq!(tree.component_container(2), None);
    assert_eq!(tree.snapshot_root().to_string(), "<section></section>");

    let mut batch = RenderBatch::new();
    batch.push_diff(2, Vec::new());
    assert_eq!(
        apply_batch(&mut tree, &batch),
        Err(ApplyError::UnknownComponent(2))
    );
}

#[test_timeout::timeout]
fn reference_capture_takes_one_slot_and_no_node() {
    let mut tree = tree_with_root_component();
    let mut batch = RenderBatch::new();
    let input = batch.push_frame(ReferenceFrame::element("input", 3));
    batch.push_frame(ReferenceFrame::attribute("type", "text"));
    batch.push_frame(ReferenceFrame::ElementReferenceCapture {
        capture_id: "input-ref".into(),
    });
    let orphan = batch.push_frame(ReferenceFrame::ElementReferenceCapture {
        capture_id: "orphan".into(),
    });
    batch.push_diff(
        ROOT_COMPONENT,
        vec![
            RenderTreeEdit::prepend(0, input),
            RenderTreeEdit::prepend(1, orphan),
        ],
    );
    apply_batch(&mut tree, &batch).expect("apply");

    let children = component_children(&tree, ROOT_COMPONENT);
    assert_eq!(children.len(), 1);
    match &children[0].kind {
        NodeKind::Element {
            reference_capture,
            attributes,
            ..
        } => {
            assert_eq!(reference_capture.as_deref(), Some("input-ref"));
            assert_eq!(attributes.len(), 1);
        }
        other => panic!("expected element, got {other:?}"),
    }
    assert!(children[0].children.is_empty());
}

#[test_timeout::timeout]
fn malformed_frame_tables_fail_without_changes() {
    let mut tree = tree_with_root_component();
    seed_texts(&mut tree, &["keep"]);
    let before = tree.snapshot_root();

    let mut batch = RenderBatch::new();
    let div = batch.push_frame(ReferenceFrame::element("div", 3));
    batch.push_frame(ReferenceFrame::text("x"));
    batch.push_diff(ROOT_COMPONENT, vec![RenderTreeEdit::prepend(0, div)]);
    assert_eq!(
        apply_batch(&mut tree, &batch),
        Err(ApplyError::MissingReferenceFrame(2))
    );

    let mut batch = RenderBatch::new();
    batch.push_diff(ROOT_COMPONENT, vec![RenderTreeEdit::prepend(0, 9)]);
    assert_eq!(
        apply_batch(&mut tree, &batch),
        Err(ApplyError::MissingReferenceFrame(9))
    );

    let mut batch = RenderBatch::new();
    let div = batch.push_frame(ReferenceFrame::element("div", 3));
    batch.push_frame(ReferenceFrame::text("x"));
    batch.push_frame(ReferenceFrame::attribute("late", "1"));
    batch.push_frame(ReferenceFrame::Component {
        component_id: 4,
        subtree_length: 1,
    });
    batch.push_diff(ROOT_COMPONENT, vec![RenderTreeEdit::prepend(0, div)]);
    assert_eq!(
        apply_batch(&mut tree, &batch),
        Err(ApplyError::UnexpectedFrame {
            kind: FrameKind::Attribute,
            context: "attribute frames may only lead an element",
        })
    );

    assert_eq!(tree.snapshot_root(), before);
    assert_eq!(tree.component_container(4), None);
}

#[test_timeout::timeout]
fn depth_zero_offset_is_restored_after_step_out() {
    let mut tree = tree_with_root_component();
    seed_texts(&mut tree, &["pre0", "pre1"]);
    let mut seed = RenderBatch::new();
    let div = seed.push_frame(ReferenceFrame::element("div", 1));
    seed.push_diff(ROOT_COMPONENT, vec![RenderTreeEdit::prepend(2, div)]);
    apply_batch(&mut tree, &seed).expect("seed div");

    let frames = vec![ReferenceFrame::text("inner"), ReferenceFrame::text("after")];
    let edits = vec![
        RenderTreeEdit::step_in(0),
        RenderTreeEdit::prepend(0, 0),
        RenderTreeEdit::StepOut,
        RenderTreeEdit::prepend(1, 1),
    ];
    let container = tree.component_container(ROOT_COMPONENT).expect("attached");
    apply_edits(&mut tree, container, 2, &edits, &frames).expect("apply");

    assert_eq!(
        tree.snapshot_root().to_string(),
        "pre0pre1<div>inner</div>after"
    );
}

#[test_timeout::timeout]
fn deeply_nested_frames_do_not_exhaust_the_stack() {
    const DEPTH: usize = 20_000;
    let mut tree = tree_with_root_component();
    let before = tree.len();

    let mut batch = RenderBatch::new();
    for level in 0..DEPTH {
        batch.push_frame(ReferenceFrame::element("div", (DEPTH - level + 1) as u32));
    }
    batch.push_frame(ReferenceFrame::text("bottom"));
    batch.push_diff(ROOT_COMPONENT, vec![RenderTreeEdit::prepend(0, 0)]);

    apply_batch(&mut tree, &batch).expect("deep batch applies");
    assert_eq!(tree.len(), before + DEPTH + 1);

    let container = tree.component_container(ROOT_COMPONENT).expect("attached");
    let mut node = tree.child_at(container, 0).expect("outermost div");
    for _ in 1..DEPTH {
        node = tree.child_at(node, 0).expect("nested div");
    }
    let leaf = tree.child_at(node, 0).expect("leaf");
    assert_eq!(
        tree.kind(leaf),
        Ok(&NodeKind::Text {
            content: "bottom".into()
        })
    );

    tree.remove(container, 0).expect("remove chain");
    assert_eq!(tree.len(), before);
}

#[test_timeout::timeout]
fn every_frame_kind_materializes_to_a_known_node() {
    let mut tree = tree_with_root_component();
    let mut batch = RenderBatch::new();
    let frames = [
        batch.push_frame(ReferenceFrame::element("hr", 1)),
        batch.push_frame(ReferenceFrame::text("plain")),
        batch.push_frame(ReferenceFrame::markup("<b>bold</b>")),
        batch.push_frame(ReferenceFrame::Component {
            component_id: 9,
            subtree_length: 1,
        }),
    ];
    let edits = frames
        .iter()
        .enumerate()
        .map(|(i, frame)| RenderTreeEdit::prepend(i as u32, *frame))
        .collect();
    batch.push_diff(ROOT_COMPONENT, edits);
    apply_batch(&mut tree, &batch).expect("apply");

    assert_eq!(text_list(&tree), vec!["element", "plain", "markup", "component"]);
}
