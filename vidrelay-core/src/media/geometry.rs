/// Largest even-sized frame inside `box_w`×`box_h` with the source's aspect
/// ratio. Sources already inside the box keep their size.
pub fn fit_within_box(width: u32, height: u32, box_w: u32, box_h: u32) -> (u32, u32) {
    if width == 0 || height == 0 || box_w == 0 || box_h == 0 {
        return (even(box_w as f64), even(box_h as f64));
    }
    let scale = (box_w as f64 / width as f64)
        .min(box_h as f64 / height as f64)
        .min(1.0);
    (
        even(width as f64 * scale).min(box_w.max(2)),
        even(height as f64 * scale).min(box_h.max(2)),
    )
}

/// ffmpeg filter expression equivalent to [`fit_within_box`] for sources whose
/// size could not be probed.
pub fn box_fit_expression(box_w: u32, box_h: u32) -> String {
    format!(
        "scale='if(gt(a,{box_w}/{box_h}),min({box_w},iw),-2)':'if(gt(a,{box_w}/{box_h}),-2,min({box_h},ih))',setsar=1"
    )
}

fn even(value: f64) -> u32 {
    let rounded = ((value / 2.0).round() * 2.0) as u32;
    rounded.max(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_ratio_close(src: (u32, u32), out: (u32, u32)) {
        let src_ratio = src.0 as f64 / src.1 as f64;
        let out_ratio = out.0 as f64 / out.1 as f64;
        // one even-rounding step on each side
        let tolerance = src_ratio * (2.0 / out.0 as f64 + 2.0 / out.1 as f64);
        assert!(
            (src_ratio - out_ratio).abs() <= tolerance,
            "{src:?} -> {out:?} ratio drifted"
        );
    }

    #[test]
    fn landscape_fills_box_width() {
        assert_eq!(fit_within_box(1920, 1080, 1280, 720), (1280, 720));
        let out = fit_within_box(2560, 1080, 1280, 720);
        assert_eq!(out.0, 1280);
        assert_ratio_close((2560, 1080), out);
    }

    #[test]
    fn portrait_is_never_squashed() {
        let out = fit_within_box(1080, 1920, 1280, 720);
        assert_eq!(out.1, 720);
        assert!(out.0 < out.1);
        assert_ratio_close((1080, 1920), out);
    }

    #[test]
    fn output_is_square_only_for_square_sources() {
        for (w, h) in [(1920, 1080), (640, 480), (720, 1280), (3840, 1600), (854, 480)] {
            let out = fit_within_box(w, h, 1280, 720);
            assert_ne!(out.0, out.1, "{w}x{h} became square");
            assert_ratio_close((w, h), out);
            assert!(out.0 <= 1280 && out.1 <= 720);
            assert_eq!(out.0 % 2, 0);
            assert_eq!(out.1 % 2, 0);
        }
        assert_eq!(fit_within_box(1000, 1000, 1280, 720), (720, 720));
    }

    #[test]
    fn small_sources_are_not_upscaled() {
        assert_eq!(fit_within_box(640, 360, 1280, 720), (640, 360));
        assert_eq!(fit_within_box(641, 361, 1280, 720), (642, 362));
    }
}
