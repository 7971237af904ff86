//! Label → register and label → delivery tables. The two are kept separate
//! so prosody can be adapted without touching reply content and vice versa.

use crate::emotion::EmotionLabel;
use crate::speech::DeliveryHint;

pub fn tone_for(label: Option<EmotionLabel>) -> &'static str {
    match label {
        Some(EmotionLabel::Sad) => {
            "Gentle and unhurried. Acknowledge the feeling first and use validating, \
             compassionate language; do not rush to cheer the user up."
        }
        Some(EmotionLabel::Happy) => {
            "Warm and a little playful. Share in the user's good mood and show genuine interest."
        }
        Some(EmotionLabel::Angry) => {
            "Calm, steady and non-confrontational. Acknowledge the frustration briefly \
             and avoid arguing or lecturing."
        }
        Some(EmotionLabel::Fearful) => {
            "Reassuring and grounding. Speak slowly and simply, and emphasize safety and presence."
        }
        Some(EmotionLabel::Surprised) => {
            "Attentive and curious. Acknowledge the surprise and help the user settle."
        }
        Some(EmotionLabel::Disgusted) => {
            "Non-judgmental and composed. Acknowledge that something feels unpleasant."
        }
        Some(EmotionLabel::Neutral) => "Friendly and conversational, with a calm, even register.",
        None => "Neutral baseline register: friendly, calm and clear.",
    }
}

pub fn delivery_for(label: Option<EmotionLabel>) -> DeliveryHint {
    let (rate, pitch_percent, gestures): (f32, i8, Vec<&str>) = match label {
        Some(EmotionLabel::Sad) => (0.85, -5, vec!["Thoughtful", "LookDown"]),
        Some(EmotionLabel::Happy) => (1.08, 5, vec!["BigSmile", "Nod"]),
        Some(EmotionLabel::Angry) => (0.9, -3, vec!["ShakeHead"]),
        Some(EmotionLabel::Fearful) => (0.88, -2, vec!["GazeAway", "Thoughtful"]),
        Some(EmotionLabel::Surprised) => (1.0, 3, vec!["Surprised", "RaiseBrows"]),
        Some(EmotionLabel::Disgusted) => (0.95, -2, vec!["ShakeHead", "LookAway"]),
        Some(EmotionLabel::Neutral) => (1.0, 0, vec!["Smile"]),
        None => (1.0, 0, Vec::new()),
    };
    DeliveryHint {
        rate,
        pitch_percent,
        gestures: gestures.into_iter().map(str::to_owned).collect(),
    }
}
