use serde::Deserialize;
use serde_json::Value;

use wall::surface::Color;
use wall::{Point, Rect, Surface};

const BAND_COLOR: Color = [0, 0, 0, 160];
/// Share of the screen height the card covers, from the bottom.
const BAND_HEIGHT: f64 = 0.2;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Credit {
    Image {
        image: String,
    },
    AuthorTitle {
        title: String,
        #[serde(default)]
        author: Option<String>,
    },
}

/// Credits for the module on screen. Only the screen flagged as the title
/// display shows it, between the end of the fade in and the start of the
/// fade out.
#[derive(Debug, Default)]
pub struct TitleCard {
    credit: Option<Credit>,
    shown: bool,
}

impl TitleCard {
    pub fn from_credit(credit: &Value) -> Self {
        let credit = match Credit::deserialize(credit) {
            Ok(Credit::AuthorTitle { title, .. }) if title.is_empty() => None,
            Ok(credit) => Some(credit),
            Err(_) => None,
        };
        Self {
            credit,
            shown: false,
        }
    }

    pub fn lines(&self) -> Vec<String> {
        match &self.credit {
            Some(Credit::Image { image }) => vec![image.clone()],
            Some(Credit::AuthorTitle { title, author }) => {
                std::iter::once(title.clone()).chain(author.clone()).collect()
            }
            None => Vec::new(),
        }
    }

    /// Shows the card if this screen is the title display and there is
    /// something to show.
    pub fn enter(&mut self, title_display: bool) -> bool {
        if title_display && !self.shown && self.credit.is_some() {
            self.shown = true;
            log::info!("Title card: {}", self.lines().join(" / "));
        }
        self.shown
    }

    pub fn exit(&mut self) {
        self.shown = false;
    }

    pub fn is_shown(&self) -> bool {
        self.shown
    }

    pub fn draw(&self, surface: &mut dyn Surface) {
        if !self.is_shown() {
            return;
        }
        let rect = surface.virtual_rect();
        let top = rect.y + rect.h * (1.0 - BAND_HEIGHT);
        let origin = surface.to_drawing_space(Point::new(rect.x, top));
        surface.fill_rect(
            Rect::new(origin.x, origin.y, rect.w, rect.h * BAND_HEIGHT),
            BAND_COLOR,
        );
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::render::RasterSurface;

    #[test]
    fn credit_shapes() {
        let card = TitleCard::from_credit(&json!({ "title": "Bouncing Balls", "author": "Wall" }));
        assert_eq!(card.lines(), ["Bouncing Balls", "Wall"]);

        let card = TitleCard::from_credit(&json!({ "image": "title.png" }));
        assert_eq!(card.lines(), ["title.png"]);

        assert!(TitleCard::from_credit(&Value::Null).lines().is_empty());
        assert!(TitleCard::from_credit(&json!({ "title": "" })).lines().is_empty());
    }

    #[test]
    fn only_the_title_display_shows_it() {
        let mut card = TitleCard::from_credit(&json!({ "title": "Balls" }));
        assert!(!card.enter(false));
        assert!(card.enter(true));
        card.exit();
        assert!(!card.is_shown());

        let mut empty = TitleCard::from_credit(&Value::Null);
        assert!(!empty.enter(true));
    }

    #[test]
    fn band_covers_bottom_of_screen() {
        let mut surface = RasterSurface::new(Rect::new(100.0, 0.0, 10.0, 10.0), 1.0);
        surface.clear([255, 255, 255, 255]);
        let mut card = TitleCard::from_credit(&json!({ "title": "Balls" }));
        card.enter(true);
        card.draw(&mut surface);
        assert_eq!(surface.pixel(5, 1), Some([255, 255, 255, 255]));
        assert_ne!(surface.pixel(5, 9), Some([255, 255, 255, 255]));
    }
}
