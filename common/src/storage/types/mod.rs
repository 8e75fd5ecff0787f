pub mod system_prompts;
pub mod verse_record;
