//! Presentación de respuestas y anuncios en Discord.

pub mod embeds;
