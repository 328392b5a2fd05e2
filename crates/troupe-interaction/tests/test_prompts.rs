use serde_json::json;
use troupe_interaction::prompts::{
    ACTOR_FEEDBACK, ASSESSMENT, BID, MENTOR_SYSTEM, SCENARIO_ANALYSIS, SOCIAL_ANALYSIS,
    SPECIAL_SYSTEM, SUMMARIZE_PERSONALITY,
};
use troupe_interaction::{PromptLibrary, parse_numbered_list};

#[test]
fn test_all_builtin_templates_render() {
    let library = PromptLibrary::new().unwrap();
    let context = json!({
        "name": "Alex",
        "user_name": "Sam",
        "scenario_name": "Debate",
        "transcript": "Sam: Hi\nAlex: Hello",
        "stage_name": "Opening",
        "stage_index": 0,
        "stage_count": 3,
        "skills": ["rebuttal", "evidence"],
        "profile": "A debater.",
        "traits": ["sharp"],
    });

    for name in [
        ACTOR_FEEDBACK,
        ASSESSMENT,
        BID,
        MENTOR_SYSTEM,
        SCENARIO_ANALYSIS,
        SOCIAL_ANALYSIS,
        SPECIAL_SYSTEM,
        SUMMARIZE_PERSONALITY,
    ] {
        let text = library.render(name, &context).unwrap();
        assert!(!text.is_empty(), "{name} rendered empty");
    }

    let assessment = library.render(ASSESSMENT, &context).unwrap();
    assert!(assessment.contains("(1 of 3)"));

    let analysis = library.render(SCENARIO_ANALYSIS, &context).unwrap();
    assert!(analysis.contains("rebuttal, evidence"));
}

#[test]
fn test_mentor_prompt_embeds_live_transcript() {
    let library = PromptLibrary::new().unwrap();
    let empty = library
        .render(MENTOR_SYSTEM, json!({ "name": "Coach", "user_name": "Sam", "scenario_name": "Pitch" }))
        .unwrap();
    assert!(empty.contains("(nothing yet)"));

    let live = library
        .render(
            MENTOR_SYSTEM,
            json!({ "name": "Coach", "user_name": "Sam", "scenario_name": "Pitch", "transcript": "Sam: Our margins are 40%" }),
        )
        .unwrap();
    assert!(live.ends_with("Sam: Our margins are 40%"));
}

#[test]
fn test_numbered_topics_from_model_text() {
    let topics = parse_numbered_list("Here are the topics:\n1. Cities should ban cars\n2. Homework should be optional\n");
    assert_eq!(topics.len(), 2);
}
