//! Prompt templates for advertisement images and promotional videos.

/// Prompt for synthesizing an advertisement image from a product analysis.
pub fn advertisement_prompt(analysis: &str, style: &str, description: &str) -> String {
    format!(
        "Create a professional advertisement showcasing: {analysis}. Transform this into a dynamic \
         commercial image with: vibrant splash effects or relevant visual elements around the product, \
         clean colorful background that complements the product, floating elements related to the \
         product's theme and industry, sharp product focus with motion and energy, professional \
         commercial lighting and photography. Style: {style}. Additional context: {description}. \
         Maintain the exact product characteristics described in the analysis. High-end advertising, \
         4K resolution, marketing ready, premium commercial photography quality."
    )
}

/// Prompt for animating the advertisement into a short video.
pub fn video_prompt(analysis: &str, style: &str) -> String {
    format!(
        "Create a dynamic promotional video showcasing: {analysis}. Include smooth camera movements, \
         elegant transitions, professional product focus, animated effects relevant to this specific \
         product type, premium lighting and marketing appeal. Style: {}. Add smooth zoom and rotation \
         effects, end with prominent product display. Duration: 5-10 seconds. High-end commercial quality.",
        style.to_lowercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advertisement_prompt_embeds_inputs() {
        let prompt = advertisement_prompt("a 330ml soda can", "Vibrant", "summer launch");
        assert!(prompt.starts_with("Create a professional advertisement showcasing: a 330ml soda can."));
        assert!(prompt.contains("Style: Vibrant. Additional context: summer launch."));
        assert!(prompt.ends_with("premium commercial photography quality."));
        assert!(!prompt.contains("  "));
    }

    #[test]
    fn test_video_prompt_lowercases_style() {
        let prompt = video_prompt("a glass bottle", "Luxury GOLD");
        assert!(prompt.contains("Style: luxury gold."));
        assert!(prompt.contains("Duration: 5-10 seconds."));
    }
}
