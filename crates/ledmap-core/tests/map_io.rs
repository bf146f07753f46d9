use ledmap_core::{
    fill_gaps, load_2d_map, load_3d_map, load_all_2d_maps, recenter, remove_duplicates, rescale,
    write_2d_map, write_3d_map, FillGapsParams, Led2D, Led3D, LedInfo, MapIoError, Point2D,
};

#[test]
fn written_2d_map_skips_unseen_leds() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("led_map_2d_20240101-120000.csv");
    let leds = vec![
        Led2D::new(4, 0, Point2D::new(0.25, 0.75)),
        Led2D::missing(2, 0),
        Led2D::new(1, 0, Point2D::new(0.5, 0.5)),
    ];

    write_2d_map(&leds, &path).unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    assert_eq!(raw, "index,u,v\n1,0.500000,0.500000\n4,0.250000,0.750000");

    let loaded = load_2d_map(&path, 7).unwrap();
    assert_eq!(loaded.len(), 2);
    assert!(loaded.iter().all(|led| led.view_id == 7));
}

#[test]
fn wrong_header_order_is_not_a_map() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("map.csv");
    std::fs::write(&path, "index,v,u\n0,0.1,0.2\n").unwrap();

    let err = load_2d_map(&path, 0).unwrap_err();
    assert!(matches!(err, MapIoError::InvalidHeader { .. }));
    assert!(load_all_2d_maps(dir.path()).unwrap().is_empty());
}

#[test]
fn post_processed_map_survives_csv() {
    let mut leds = vec![
        Led3D::at(0, 0.0, 0.0, 0.0),
        Led3D::at(1, 2.0, 0.0, 0.0),
        Led3D::at(1, 2.0, 0.2, 0.0),
        Led3D::at(2, 4.0, 0.0, 0.0),
        Led3D::at(4, 8.0, 0.0, 0.0),
    ];
    leds = remove_duplicates(leds);
    assert_eq!(leds.len(), 4);
    assert_eq!(leds[1].info(), LedInfo::Merged);

    assert_eq!(fill_gaps(&mut leds, &FillGapsParams::default()), 1);
    assert_eq!(leds[3].info(), LedInfo::Interpolated);

    let scale = rescale(&mut leds, 1.0).unwrap();
    assert!(scale > 0.0);
    recenter(&mut leds).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("led_map_3d.csv");
    write_3d_map(&leds, &path).unwrap();
    let loaded = load_3d_map(&path).unwrap();

    assert_eq!(loaded.len(), 5);
    for (a, b) in leds.iter().zip(&loaded) {
        assert_eq!(a.led_id, b.led_id);
        assert!((a.point.position - b.point.position).norm() < 1e-5);
    }
}
