//! End-to-end lowering scenarios: uniform layout, sampler tables, stage
//! emission and capability flags.

use std::cell::Cell;
use std::rc::Rc;

use pretty_assertions::assert_eq;

use crate::compiler::lang::{TextureFilter, TextureRepeat};
use crate::compiler::{
    CompileError, DefaultIdentifierActions, DeprecatedConverter, GeneratedCode, IdentifierActions,
    ShaderCompiler, ShaderMode, Stage,
};

fn default_actions() -> DefaultIdentifierActions {
    let mut actions = DefaultIdentifierActions {
        default_filter: TextureFilter::Linear,
        default_repeat: TextureRepeat::Disable,
        base_texture_binding_index: 4,
        texture_layout_set: 1,
        base_uniform_string: "material.".to_string(),
        global_buffer_array_variable: "global_shader_uniforms.data".to_string(),
        instance_uniform_index_variable: "instance_offset".to_string(),
        base_varying_index: 8,
        ..DefaultIdentifierActions::default()
    };
    for (from, to) in [
        ("ALBEDO", "albedo"),
        ("ALPHA", "alpha"),
        ("DIFFUSE_LIGHT", "diffuse_light"),
        ("SCREEN_UV", "screen_uv"),
        ("VERTEX", "vertex_interp"),
        ("UV", "uv_interp"),
        ("TIME", "global_time"),
    ] {
        actions.renames.insert(from.to_string(), to.to_string());
    }
    actions
}

fn entry_actions() -> IdentifierActions {
    let mut actions = IdentifierActions::default();
    actions
        .entry_point_stages
        .insert("vertex".to_string(), Stage::Vertex);
    actions
        .entry_point_stages
        .insert("fragment".to_string(), Stage::Fragment);
    actions
        .entry_point_stages
        .insert("light".to_string(), Stage::Fragment);
    actions
}

fn compile(source: &str) -> (GeneratedCode, IdentifierActions) {
    compile_with(source, default_actions(), entry_actions())
}

fn compile_with(
    source: &str,
    defaults: DefaultIdentifierActions,
    mut actions: IdentifierActions,
) -> (GeneratedCode, IdentifierActions) {
    let compiler = ShaderCompiler::new(defaults);
    let gen_code = compiler
        .compile(ShaderMode::Spatial, source, &mut actions, "test.gdshader")
        .expect("compile failed");
    (gen_code, actions)
}

#[test]
fn test_uniform_layout() {
    let (gen_code, _) = compile(
        "shader_type spatial;\nuniform float a;\nuniform vec3 b;\nuniform mat4 c;\nuniform int d[3];\nvoid fragment() {}\n",
    );
    assert_eq!(gen_code.uniform_offsets, vec![0, 16, 32, 96]);
    assert_eq!(gen_code.uniform_total_size, 144);
    assert_eq!(
        gen_code.uniforms,
        "highp float m_a;\nhighp vec3 m_b;\nhighp mat4 m_c;\nint m_d[3];\n"
    );
}

#[test]
fn test_uniform_layout_invariants() {
    let source = "shader_type spatial;\nuniform bool flag;\nuniform vec2 half_size;\nuniform mat3 basis;\nuniform float weights[5];\nuniform ivec3 counts;\nvoid fragment() {}\n";
    let (gen_code, actions) = compile(source);
    let mut uniforms: Vec<_> = actions
        .uniforms
        .values()
        .filter(|u| u.order >= 0)
        .collect();
    uniforms.sort_by_key(|u| u.order);
    assert_eq!(gen_code.uniform_offsets.len(), uniforms.len());
    for (offset, uniform) in gen_code.uniform_offsets.iter().zip(&uniforms) {
        let alignment =
            crate::compiler::lower::layout::align_of(uniform.datatype, uniform.array_size);
        assert_eq!(offset % alignment, 0, "offset {} misaligned", offset);
    }
    for pair in gen_code.uniform_offsets.windows(2) {
        assert!(pair[1] > pair[0]);
    }
    assert_eq!(gen_code.uniform_total_size % 16, 0);
}

#[test]
fn test_texture_table_density_and_order() {
    let (gen_code, actions) = compile(
        "shader_type spatial;\nuniform sampler2D t1;\nuniform vec4 col : source_color;\nuniform sampler2D screen : hint_screen_texture;\nuniform usampler3D t2 : filter_nearest, repeat_enable;\nvoid fragment() {}\n",
    );
    let names: Vec<&str> = gen_code
        .texture_uniforms
        .iter()
        .map(|t| t.name.as_str())
        .collect();
    assert_eq!(names, vec!["t1", "t2"]);
    assert_eq!(gen_code.texture_uniforms[1].filter, TextureFilter::Nearest);
    assert_eq!(gen_code.texture_uniforms[1].repeat, TextureRepeat::Enable);
    // Vulkan-style emission: separate texture objects with explicit
    // set/binding pairs; bindings continue from the base index.
    let globals = &gen_code.stage_globals[Stage::Fragment as usize];
    assert!(globals.contains("layout(set = 1, binding = 4) uniform texture2D m_t1;"));
    assert!(globals.contains("layout(set = 1, binding = 5) uniform utexture3D m_t2;"));
    // Screen-texture uniforms are consumed as virtual names, never emitted.
    assert!(!globals.contains("m_screen"));
    assert!(actions.uniforms.contains_key("t1"));
    assert!(actions.uniforms.contains_key("col"));
}

#[test]
fn test_global_and_instance_uniforms() {
    let (gen_code, actions) = compile(
        "shader_type spatial;\nglobal uniform float g;\ninstance uniform vec3 tint;\nuniform float amount;\nvoid fragment() {\nALBEDO = vec3(g) + tint + vec3(amount);\n}\n",
    );
    // Globals pack as a uint index; instance uniforms contribute nothing.
    assert_eq!(gen_code.uniforms, "uint m_g;\nhighp float m_amount;\n");
    assert_eq!(gen_code.uniform_offsets.len(), 2);
    let fragment = &gen_code.code["fragment"];
    assert!(fragment.contains("(global_shader_uniforms.data[material.m_g].x)"));
    assert!(fragment.contains("(global_shader_uniforms.data[(instance_offset+0)].xyz)"));
    assert!(fragment.contains("material.m_amount"));
    assert!(actions.uniforms.contains_key("tint"));
}

#[test]
fn test_global_matrix_reconstruction() {
    let (gen_code, _) = compile(
        "shader_type spatial;\nglobal uniform mat3 warp;\nvoid fragment() {\nALBEDO = warp * vec3(1.0);\n}\n",
    );
    let fragment = &gen_code.code["fragment"];
    assert!(fragment.contains(
        "mat3(global_shader_uniforms.data[material.m_warp].xyz,global_shader_uniforms.data[material.m_warp+1u].xyz,global_shader_uniforms.data[material.m_warp+2u].xyz)"
    ));
}

#[test]
fn test_function_dependency_order_is_alphabetical() {
    let (gen_code, _) = compile(
        "shader_type spatial;\nfloat zeta(float x) { return x; }\nfloat alpha(float x) { return zeta(x) + 1.0; }\nvoid fragment() {\nALBEDO = vec3(alpha(1.0) + zeta(2.0));\n}\n",
    );
    let globals = &gen_code.stage_globals[Stage::Fragment as usize];
    let alpha_pos = globals.find("float m_alpha(float m_x)").unwrap();
    let zeta_pos = globals.find("float m_zeta(float m_x)").unwrap();
    // alpha sorts first but depends on zeta, which must come before it.
    assert!(zeta_pos < alpha_pos);
    // The entry body is stored without its signature.
    let fragment = &gen_code.code["fragment"];
    assert!(fragment.contains("m_alpha(1.0)"));
    assert!(!fragment.contains("void fragment"));
    // Helpers not reachable from an entry never land in stage globals.
    assert!(!gen_code.code.contains_key("alpha"));
}

#[test]
fn test_compile_is_deterministic() {
    let source = "shader_type spatial;\nuniform sampler2D tex;\nuniform float amount;\nvarying vec3 world;\nfloat helper(float x) { return x * amount; }\nvoid vertex() { world = VERTEX; }\nvoid fragment() {\nALBEDO = texture(tex, UV).rgb * helper(TIME);\n}\n";
    let (first, _) = compile(source);
    let (second, _) = compile(source);
    assert_eq!(first.stage_globals, second.stage_globals);
    assert_eq!(first.code, second.code);
    assert_eq!(first.defines, second.defines);
    assert_eq!(first.uniform_offsets, second.uniform_offsets);
}

#[test]
fn test_varying_locations() {
    let (gen_code, _) = compile(
        "shader_type spatial;\nvarying flat int id3;\nvarying mat3 m;\nvarying vec2 uv2;\nvoid vertex() {\nid3 = 1;\nm = mat3(1.0);\nuv2 = vec2(0.0);\n}\nvoid fragment() {}\n",
    );
    let vertex_globals = &gen_code.stage_globals[Stage::Vertex as usize];
    let fragment_globals = &gen_code.stage_globals[Stage::Fragment as usize];
    // Sorted by name from the base location; mat3 consumes three slots.
    assert!(vertex_globals.contains("layout(location=8) flat out int m_id3;\n"));
    assert!(vertex_globals.contains("layout(location=9) out highp mat3 m_m;\n"));
    assert!(vertex_globals.contains("layout(location=12) out highp vec2 m_uv2;\n"));
    assert!(fragment_globals.contains("layout(location=12) in highp vec2 m_uv2;\n"));
}

#[test]
fn test_boolean_varyings_are_skipped() {
    let (gen_code, _) = compile(
        "shader_type spatial;\nvarying bool toggled;\nvoid vertex() {}\nvoid fragment() {}\n",
    );
    assert!(!gen_code.stage_globals[Stage::Vertex as usize].contains("m_toggled"));
}

#[test]
fn test_fragment_varyings_become_frag_to_light() {
    let (gen_code, _) = compile(
        "shader_type spatial;\nvarying vec3 shading;\nvoid fragment() {\nshading = vec3(0.5);\n}\nvoid light() {\nDIFFUSE_LIGHT = shading;\n}\n",
    );
    let fragment_globals = &gen_code.stage_globals[Stage::Fragment as usize];
    assert!(fragment_globals.contains("struct {\n\tvec3 m_shading;\n} frag_to_light;\n"));
    // Not an interpolated location.
    assert!(!fragment_globals.contains("layout(location=8) in highp vec3 m_shading"));
    assert!(gen_code.code["fragment"].contains("frag_to_light.m_shading=vec3(0.5)"));
    assert!(gen_code.code["light"].contains("diffuse_light=frag_to_light.m_shading"));
}

#[test]
fn test_screen_texture_sampling() {
    let mut converter = DeprecatedConverter::new(
        "shader_type spatial; void fragment() { vec4 c = texture(SCREEN_TEXTURE, SCREEN_UV); }",
    );
    assert!(converter.is_legacy());
    assert!(converter.convert(), "{}", converter.error_text());
    let migrated = converter.emit();
    assert!(migrated.contains("uniform sampler2D SCREEN_TEXTURE : hint_screen_texture, filter_linear_mipmap;"));

    let (gen_code, _) = compile(&migrated);
    assert!(gen_code.uses_screen_texture);
    assert!(gen_code.uses_screen_texture_mipmaps);
    let fragment = &gen_code.code["fragment"];
    assert!(fragment
        .contains("texture(sampler2D(color_buffer, SAMPLER_LINEAR_WITH_MIPMAPS_CLAMP), screen_uv)"));
}

#[test]
fn test_depth_and_normal_roughness_textures() {
    let (gen_code, _) = compile(
        "shader_type spatial;\nuniform sampler2D depth_tex : hint_depth_texture, filter_nearest;\nuniform sampler2D nr_tex : hint_normal_roughness_texture, filter_nearest;\nvoid fragment() {\nfloat d = texture(depth_tex, SCREEN_UV).r;\nvec4 nr = texture(nr_tex, SCREEN_UV);\n}\n",
    );
    assert!(gen_code.uses_depth_texture);
    assert!(gen_code.uses_normal_roughness_texture);
    let fragment = &gen_code.code["fragment"];
    assert!(fragment.contains("texture(sampler2D(depth_buffer, SAMPLER_NEAREST_CLAMP), screen_uv)"));
    assert!(fragment.contains(
        "normal_roughness_compatibility(texture(sampler2D(normal_roughness_buffer, SAMPLER_NEAREST_CLAMP), screen_uv))"
    ));
}

#[test]
fn test_luminance_multiplier_wrap() {
    let mut defaults = default_actions();
    defaults.apply_luminance_multiplier = true;
    let (gen_code, _) = compile_with(
        "shader_type spatial;\nuniform sampler2D screen : hint_screen_texture, filter_linear;\nvoid fragment() {\nvec4 c = texture(screen, SCREEN_UV);\n}\n",
        defaults,
        entry_actions(),
    );
    assert!(gen_code.code["fragment"].contains(
        "(texture(sampler2D(color_buffer, SAMPLER_LINEAR_CLAMP), screen_uv) * vec4(vec3(sc_luminance_multiplier), 1.0))"
    ));
}

#[test]
fn test_multiview_samplers() {
    let mut defaults = default_actions();
    defaults.check_multiview_samplers = true;
    let (gen_code, _) = compile_with(
        "shader_type spatial;\nuniform sampler2D screen : hint_screen_texture, filter_linear;\nvoid fragment() {\nvec4 c = texture(screen, SCREEN_UV);\nivec2 sz = textureSize(screen, 0);\n}\n",
        defaults,
        entry_actions(),
    );
    let fragment = &gen_code.code["fragment"];
    assert!(fragment.contains("multiviewSampler(color_buffer, SAMPLER_LINEAR_CLAMP)"));
    assert!(fragment.contains("multiview_uv(screen_uv.xy)"));
    // Size queries take no UV and must stay unwrapped.
    assert!(fragment.contains("textureSize(multiviewSampler(color_buffer, SAMPLER_LINEAR_CLAMP), 0)"));
    assert!(!fragment.contains("textureSize(multiviewSampler(color_buffer, SAMPLER_LINEAR_CLAMP), multiview_uv"));
}

#[test]
fn test_time_usage_flags() {
    let (gen_code, _) = compile(
        "shader_type spatial;\nvoid vertex() { float t = TIME; }\nvoid fragment() {}\n",
    );
    assert!(gen_code.uses_vertex_time);
    assert!(!gen_code.uses_fragment_time);

    let (gen_code, _) = compile(
        "shader_type spatial;\nvoid fragment() { float t = TIME; }\n",
    );
    assert!(gen_code.uses_fragment_time);
    assert!(!gen_code.uses_vertex_time);
}

#[test]
fn test_render_modes_and_usage_defines() {
    let mut defaults = default_actions();
    defaults.render_mode_defines.insert(
        "world_vertex_coords".to_string(),
        "#define VERTEX_WORLD_COORDS_USED\n".to_string(),
    );
    defaults
        .usage_defines
        .insert("ALBEDO".to_string(), "#define ALBEDO_USED\n".to_string());
    defaults
        .usage_defines
        .insert("ALPHA".to_string(), "@ALBEDO".to_string());

    let mut actions = entry_actions();
    let unshaded = Rc::new(Cell::new(false));
    actions
        .render_mode_flags
        .insert("unshaded".to_string(), unshaded.clone());
    let albedo_written = Rc::new(Cell::new(false));
    actions
        .write_flag_pointers
        .insert("ALBEDO".to_string(), albedo_written.clone());
    let screen_uv_used = Rc::new(Cell::new(false));
    actions
        .usage_flag_pointers
        .insert("SCREEN_UV".to_string(), screen_uv_used.clone());

    let (gen_code, _) = compile_with(
        "shader_type spatial;\nrender_mode unshaded, world_vertex_coords;\nvoid fragment() {\nALPHA = 0.5;\nALBEDO = vec3(1.0);\n}\n",
        defaults,
        actions,
    );
    // The ALPHA define indirects to the ALBEDO define; render-mode defines
    // come first; each define appears once.
    assert_eq!(
        gen_code.defines,
        vec![
            "#define VERTEX_WORLD_COORDS_USED\n".to_string(),
            "#define ALBEDO_USED\n".to_string(),
        ]
    );
    assert!(unshaded.get());
    assert!(albedo_written.get());
    assert!(!screen_uv_used.get());
}

#[test]
fn test_discard_usage_flag() {
    let mut actions = entry_actions();
    let discard_used = Rc::new(Cell::new(false));
    actions
        .usage_flag_pointers
        .insert("DISCARD".to_string(), discard_used.clone());
    let (gen_code, _) = compile_with(
        "shader_type spatial;\nvoid fragment() {\nif (ALPHA < 0.5)\ndiscard;\n}\n",
        default_actions(),
        actions,
    );
    assert!(discard_used.get());
    assert!(gen_code.code["fragment"].contains("discard;"));
}

#[test]
fn test_unresolved_sampler_default_is_invariant_error() {
    let mut defaults = default_actions();
    defaults.default_filter = TextureFilter::Default;
    let compiler = ShaderCompiler::new(defaults);
    let mut actions = entry_actions();
    let result = compiler.compile(
        ShaderMode::Spatial,
        "shader_type spatial;\nuniform sampler2D tex;\nvoid fragment() {\nvec4 c = texture(tex, UV);\n}\n",
        &mut actions,
        "test.gdshader",
    );
    assert!(matches!(result, Err(CompileError::Invariant(_))));
}

#[test]
fn test_parse_error_carries_path_and_line() {
    let compiler = ShaderCompiler::new(default_actions());
    let mut actions = entry_actions();
    let result = compiler.compile(
        ShaderMode::Spatial,
        "shader_type spatial;\nvoid fragment() {\nfloat x = ;\n}\n",
        &mut actions,
        "broken.gdshader",
    );
    match result {
        Err(CompileError::Parse { path, line, .. }) => {
            assert_eq!(path, "broken.gdshader");
            assert_eq!(line, 3);
        }
        other => panic!("expected parse error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_low_end_emission() {
    let mut defaults = default_actions();
    defaults.is_low_end = true;
    let (gen_code, _) = compile_with(
        "shader_type spatial;\nuniform sampler2D tex;\nvoid fragment() {\nALBEDO = texture(tex, UV).rgb;\n}\n",
        defaults,
        entry_actions(),
    );
    let globals = &gen_code.stage_globals[Stage::Fragment as usize];
    // GL path: combined samplers, no descriptor-set layout qualifiers.
    assert!(globals.contains("uniform sampler2D m_tex;\n"));
    assert!(!globals.contains("layout(set ="));
    assert!(gen_code.code["fragment"].contains("texture(m_tex, uv_interp)"));
}

#[test]
fn test_structs_and_constants_in_stage_globals() {
    let (gen_code, _) = compile(
        "shader_type spatial;\nstruct Surface {\n\tvec3 albedo;\n\tfloat rough;\n};\nconst float GOLDEN = 1.618;\nSurface make_surface() {\n\tSurface s;\n\ts.albedo = vec3(GOLDEN);\n\ts.rough = 0.5;\n\treturn s;\n}\nvoid fragment() {\nALBEDO = make_surface().albedo;\n}\n",
    );
    for stage in &gen_code.stage_globals {
        assert!(stage.contains("struct m_Surface {\nvec3 albedo;\nfloat rough;\n};\n"));
        assert!(stage.contains("const highp float m_GOLDEN=1.618;\n"));
    }
    let fragment_globals = &gen_code.stage_globals[Stage::Fragment as usize];
    assert!(fragment_globals.contains("m_Surface m_make_surface()"));
}
