use crate::dialogue::GenerationRequest;

pub const COMPANION_SYSTEM_INSTRUCTION: &str = "\
You are Furhat, a companion robot talking with an older adult. \
Speak warmly, calmly and respectfully, in simple language with short to medium sentences. \
Avoid slang, technical terms and fast-paced phrasing. \
Only refer to facts the user has actually mentioned; never invent details, causes or advice. \
You will be told the user's facial expression as read by a camera and a tone to use. \
Let the tone shape how you speak, but do not mention the camera or name the emotion \
unless the user brings it up. Reply with one to three sentences of plain spoken text, \
without markup, lists or emoji.";

/// Per-turn prompt carrying the utterance and its emotion conditioning.
pub fn build_prompt(request: &GenerationRequest) -> String {
    let emotion = match request.label {
        Some(label) => format!(
            "{label} (confidence {:.2})",
            request.confidence.clamp(0.0, 1.0)
        ),
        None if request.inferred.is_some() => "unknown (no recent reading)".to_owned(),
        None => "unknown (no recent reading; do not guess)".to_owned(),
    };
    let words = match request.inferred {
        Some(label) => format!("Their words suggest they feel {label}.\n"),
        None => String::new(),
    };
    format!(
        "User said: \"{utterance}\"\n\
         Facial expression: {emotion}\n\
         {words}\
         Tone: {tone}\n\
         Respond to the user now.",
        utterance = request.utterance.trim(),
        tone = request.tone,
    )
}

/// One-word classification of the user's message.
pub fn build_inference_prompt(utterance: &str) -> String {
    format!(
        "Based on the user's message, choose the ONE most likely emotion.\n\
         Only return ONE word from this list:\n\
         happy, sad, angry, fear, disgust, surprise, neutral\n\n\
         User message: \"{}\"",
        utterance.trim()
    )
}
