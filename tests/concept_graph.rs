use tournament_harness::channel::{Channel, GenerationContext};
use tournament_harness::concept_graph::{build_concept_graph, Document, GraphConfig, GraphMode};

fn battery_corpus() -> Vec<Document> {
    [
        "Lithium anode coatings suppress dendrite growth in electrolyte cells",
        "Lithium anode interphase improves electrolyte stability",
        "Lithium anode cycling with solid electrolyte separators",
        "Sodium anode hosts reduce dendrite growth in electrolyte cells",
        "Sodium anode interphase improves electrolyte stability",
        "Sodium anode cycling with solid electrolyte separators",
    ]
    .iter()
    .enumerate()
    .map(|(i, text)| Document::new(format!("doc-{i}"), *text))
    .collect()
}

fn has_hole(graph: &tournament_harness::ConceptGraph, a: &str, b: &str) -> bool {
    graph.holes.iter().any(|h| {
        (h.concept_a == a && h.concept_b == b) || (h.concept_a == b && h.concept_b == a)
    })
}

#[test]
fn disjoint_concepts_with_shared_context_form_a_hole() {
    let graph = build_concept_graph(&battery_corpus(), &GraphConfig::default());

    assert_eq!(graph.mode, GraphMode::Full);
    assert_eq!(graph.documents, 6);
    assert!(graph.warnings.is_empty());
    assert!(has_hole(&graph, "lithium", "sodium"), "holes: {:?}", graph.holes);

    let hole = graph
        .holes
        .iter()
        .find(|h| h.concept_a == "lithium" && h.concept_b == "sodium")
        .unwrap();
    assert_eq!(hole.co_occurrences, 0);
    assert_eq!(hole.freq_a, 3);
    assert_eq!(hole.freq_b, 3);
    assert!(hole.jaccard >= 0.5);
    assert!(hole.hole_score > 0.0);
}

#[test]
fn edges_only_keep_positive_pmi() {
    let graph = build_concept_graph(&battery_corpus(), &GraphConfig::default());
    assert!(!graph.edges.is_empty());
    let max_pmi = 6f64.log2();
    for edge in &graph.edges {
        assert!(edge.pmi > 0.0 && edge.pmi <= max_pmi);
        assert!(edge.co_occurrences >= 1);
    }
    assert!(!graph
        .edges
        .iter()
        .any(|e| (e.source == "lithium" && e.target == "sodium")
            || (e.source == "sodium" && e.target == "lithium")));
}

#[test]
fn tiny_corpus_falls_back_to_frequency_ranking() {
    let docs = battery_corpus().into_iter().take(3).collect::<Vec<_>>();
    let graph = build_concept_graph(&docs, &GraphConfig::default());
    assert_eq!(graph.mode, GraphMode::FrequencyOnly);
    assert!(graph.holes.is_empty());
    assert!(graph.edges.is_empty());
    assert_eq!(graph.warnings.len(), 1);
    assert_eq!(graph.nodes[0].freq, 3);
}

#[test]
fn graph_explorer_turns_holes_into_tagged_proposals() {
    let graph = build_concept_graph(&battery_corpus(), &GraphConfig::default());
    let ctx = GenerationContext {
        theme: "safer fast-charging batteries".to_string(),
        holes: graph.holes.clone(),
        concepts: graph.top_concepts(10),
        count: 4,
        ..GenerationContext::default()
    };
    let first = Channel::GraphExplorer.generate(17, &ctx);
    let second = Channel::GraphExplorer.generate(17, &ctx);

    assert_eq!(first, second);
    assert_eq!(first.len(), 4);
    for c in &first {
        assert_eq!(c.origin_channel, Some(Channel::GraphExplorer));
        assert_eq!(c.taxonomy_labels.len(), 2);
        assert!(c.text.contains("safer fast-charging batteries"));
    }
    let top = &graph.holes[0];
    assert!(first[0].text.contains(&top.concept_a));
    assert!(first[0].text.contains(&top.concept_b));
}
