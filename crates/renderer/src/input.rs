//! Pointer tracking for `iMouse`.
//!
//! Window events arrive in client coordinates with a top-left origin; the
//! shader expects canvas pixels with a bottom-left origin. `MouseState`
//! converts between the two using the canvas rectangle it was last given.
use winit::event::MouseButton;

/// Placement of the drawing canvas inside the client area, in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CanvasRect {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl CanvasRect {
    pub fn from_size(width: u32, height: u32) -> Self {
        Self {
            left: 0.0,
            top: 0.0,
            width: width as f32,
            height: height as f32,
        }
    }

    /// Canvas pixel size, rounded for surface configuration.
    pub fn pixel_size(&self) -> (u32, u32) {
        (self.width.max(0.0).round() as u32, self.height.max(0.0).round() as u32)
    }

    fn to_canvas(self, client_x: f32, client_y: f32) -> [f32; 2] {
        [client_x - self.left, self.height - (client_y - self.top)]
    }
}

#[derive(Debug, Clone, Default)]
pub struct MouseState {
    canvas: CanvasRect,
    position: [f32; 2],
    click: [f32; 2],
    pressed: bool,
}

impl MouseState {
    pub fn new(canvas: CanvasRect) -> Self {
        Self {
            canvas,
            ..Self::default()
        }
    }

    pub fn canvas(&self) -> CanvasRect {
        self.canvas
    }

    pub fn set_canvas(&mut self, canvas: CanvasRect) {
        self.canvas = canvas;
    }

    pub fn pointer_moved(&mut self, client_x: f32, client_y: f32) {
        self.position = self.canvas.to_canvas(client_x, client_y);
    }

    /// Latches the click position; only the primary button counts.
    pub fn pointer_down(&mut self, button: MouseButton, client_x: f32, client_y: f32) {
        if button != MouseButton::Left {
            return;
        }
        let point = self.canvas.to_canvas(client_x, client_y);
        self.position = point;
        self.click = point;
        self.pressed = true;
    }

    pub fn pointer_up(&mut self, button: MouseButton) {
        if button != MouseButton::Left {
            return;
        }
        self.pressed = false;
        self.click = [0.0, 0.0];
    }

    pub fn is_pressed(&self) -> bool {
        self.pressed
    }

    /// `[x, y, click_x, click_y]` as fed to `iMouse`.
    pub fn as_uniform(&self) -> [f32; 4] {
        [self.position[0], self.position[1], self.click[0], self.click[1]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canvas() -> CanvasRect {
        CanvasRect {
            left: 10.0,
            top: 20.0,
            width: 400.0,
            height: 300.0,
        }
    }

    #[test]
    fn click_is_flipped_to_bottom_left_origin() {
        let mut mouse = MouseState::new(canvas());
        mouse.pointer_down(MouseButton::Left, 60.0, 70.0);
        let [x, y, click_x, click_y] = mouse.as_uniform();
        assert_eq!(click_y, 250.0);
        assert_eq!(click_x, 50.0);
        assert_eq!([x, y], [50.0, 250.0]);
    }

    #[test]
    fn release_resets_click_but_keeps_position() {
        let mut mouse = MouseState::new(canvas());
        mouse.pointer_down(MouseButton::Left, 60.0, 70.0);
        mouse.pointer_moved(110.0, 120.0);
        mouse.pointer_up(MouseButton::Left);
        assert_eq!(mouse.as_uniform(), [100.0, 200.0, 0.0, 0.0]);
        assert!(!mouse.is_pressed());
    }

    #[test]
    fn secondary_buttons_are_ignored() {
        let mut mouse = MouseState::new(canvas());
        mouse.pointer_down(MouseButton::Right, 60.0, 70.0);
        assert_eq!(mouse.as_uniform(), [0.0; 4]);
        assert!(!mouse.is_pressed());
    }
}
