#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
    pub arg_key: &'static str,
}

/// Commands whose whole remainder is one free-text argument.
pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "mode",
        action: "set_mode",
        arg_key: "mode",
    },
    CommandSpec {
        command: "submode",
        action: "set_submode",
        arg_key: "submode",
    },
    CommandSpec {
        command: "custom",
        action: "set_custom",
        arg_key: "text",
    },
    CommandSpec {
        command: "ask",
        action: "ask",
        arg_key: "question",
    },
    CommandSpec {
        command: "show",
        action: "show_turn",
        arg_key: "index",
    },
];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "image",
    action: "load_image",
    arg_key: "path",
}];

/// Commands taking a leading key followed by free text.
pub(crate) const KEYED_COMMANDS: &[(CommandSpec, &str)] = &[
    (
        CommandSpec {
            command: "field",
            action: "set_field",
            arg_key: "field",
        },
        "value",
    ),
    (
        CommandSpec {
            command: "lens",
            action: "apply_lens",
            arg_key: "lens",
        },
        "intent",
    ),
    (
        CommandSpec {
            command: "feedback",
            action: "feedback",
            arg_key: "rating",
        },
        "comment",
    ),
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "analyze",
        action: "analyze",
        arg_key: "",
    },
    CommandSpec {
        command: "turns",
        action: "list_turns",
        arg_key: "",
    },
    CommandSpec {
        command: "modes",
        action: "list_modes",
        arg_key: "",
    },
    CommandSpec {
        command: "lenses",
        action: "list_lenses",
        arg_key: "",
    },
    CommandSpec {
        command: "new",
        action: "new_artwork",
        arg_key: "",
    },
    CommandSpec {
        command: "help",
        action: "help",
        arg_key: "",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
        arg_key: "",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
        arg_key: "",
    },
];

pub(crate) const EXPORT_COMMAND: CommandSpec = CommandSpec {
    command: "export",
    action: "export",
    arg_key: "format",
};

pub const SESSION_HELP_COMMANDS: &[&str] = &[
    "/image <path>",
    "/mode <id>",
    "/submode <id>",
    "/field <id> <value>",
    "/custom <instructions>",
    "/analyze",
    "/ask <question>",
    "/lens <id> [stated intent]",
    "/turns",
    "/show <n>",
    "/export <md|json|html> [path]",
    "/feedback <0-5> [comment]",
    "/modes",
    "/lenses",
    "/new",
    "/quit",
];
